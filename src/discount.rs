//! Discount rules: event detection, the daily deal draw and price math.
//!
//! Everything here is pure. The calendar day is always passed in by the
//! caller so the same inputs give the same answer in every process.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::types::{DiscountType, Game, PromoEvent};

/// Percentage taken off for the flash sale winner.
pub const FLASH_SALE_PERCENT: i64 = 99;
/// Percentage taken off during a special event.
pub const EVENT_PERCENT: i64 = 25;
/// Percentage taken off the daily deal.
pub const DAILY_DEAL_PERCENT: i64 = 10;

const LCG_MULTIPLIER: u64 = 1_664_525;
const LCG_INCREMENT: u64 = 1_013_904_223;
const LCG_MASK: u64 = 0xFFFF_FFFF;

const HOLIDAYS: &[(u32, u32, &str)] = &[
    (1, 1, "New Year Sale"),
    (17, 8, "Independence Day"),
    (25, 12, "Christmas Sale"),
    (31, 12, "End Year Sale"),
];

/// Whether a special event is running, and under which name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventStatus {
    pub is_special: bool,
    pub name: Option<String>,
}

/// The price a buyer would pay and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscountQuote {
    pub final_price: i64,
    pub discount_type: DiscountType,
    pub discount_percent: i64,
    pub event_name: Option<String>,
}

/// Resolves the special event for `today`.
///
/// An admin-configured event always wins; otherwise double dates (5.5,
/// 12.12, ...) and then the fixed holiday table apply.
pub fn event_status(today: NaiveDate, active_event: Option<&PromoEvent>) -> EventStatus {
    if let Some(event) = active_event {
        return EventStatus {
            is_special: true,
            name: Some(event.title.clone()),
        };
    }

    let (day, month) = (today.day(), today.month());
    if day == month {
        return EventStatus {
            is_special: true,
            name: Some(format!("{day}.{day} Mega Sale")),
        };
    }

    match HOLIDAYS.iter().find(|(d, m, _)| *d == day && *m == month) {
        Some((_, _, name)) => EventStatus {
            is_special: true,
            name: Some((*name).to_string()),
        },
        None => EventStatus {
            is_special: false,
            name: None,
        },
    }
}

/// Seed of the daily deal draw: the date as the integer `YYYYMMDD`.
pub fn daily_seed(today: NaiveDate) -> u64 {
    let year = u64::try_from(today.year()).unwrap_or(0);
    year * 10_000 + u64::from(today.month()) * 100 + u64::from(today.day())
}

/// Index of today's daily deal in the canonical game ordering.
///
/// One step of a 32-bit linear congruential generator seeded with
/// [`daily_seed`]. Returns `None` for an empty catalog.
pub fn daily_deal_index(today: NaiveDate, total_games: u64) -> Option<u64> {
    if total_games == 0 {
        return None;
    }
    let next = LCG_MULTIPLIER
        .wrapping_mul(daily_seed(today))
        .wrapping_add(LCG_INCREMENT)
        & LCG_MASK;
    Some(next % total_games)
}

/// Floor of `price * (100 - percent_off) / 100`.
pub fn discounted(price: i64, percent_off: i64) -> i64 {
    let scaled = i128::from(price) * i128::from(100 - percent_off);
    scaled.div_euclid(100) as i64
}

/// Prices a game. The first matching rule wins; discounts never stack.
pub fn calculate_discount(
    today: NaiveDate,
    game: &Game,
    flash_sale_available: bool,
    active_event: Option<&PromoEvent>,
) -> DiscountQuote {
    let event = event_status(today, active_event);
    let price = game.price;

    if event.is_special && game.category.to_lowercase().contains("pro") {
        let (discount_type, percent) = if flash_sale_available {
            (DiscountType::FlashSale, FLASH_SALE_PERCENT)
        } else {
            (DiscountType::Event, EVENT_PERCENT)
        };
        return DiscountQuote {
            final_price: discounted(price, percent),
            discount_type,
            discount_percent: percent,
            event_name: event.name,
        };
    }

    if game.is_daily_deal {
        return DiscountQuote {
            final_price: discounted(price, DAILY_DEAL_PERCENT),
            discount_type: DiscountType::Daily,
            discount_percent: DAILY_DEAL_PERCENT,
            event_name: Some("Daily Deal".to_string()),
        };
    }

    undiscounted(price)
}

/// The quote for a buyer who gets no discount.
pub fn undiscounted(price: i64) -> DiscountQuote {
    DiscountQuote {
        final_price: price,
        discount_type: DiscountType::None,
        discount_percent: 0,
        event_name: None,
    }
}
