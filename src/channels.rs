use std::fmt;

use serde::{Deserialize, Serialize};

/// The payment categories a buyer can pick at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Qris,
    VirtualAccount,
    Ewallet,
    Retail,
}

const QRIS: &[&str] = &["QRIS"];

const VIRTUAL_ACCOUNT: &[&str] = &[
    "VIRTUAL_ACCOUNT_BCA",
    "VIRTUAL_ACCOUNT_BANK_MANDIRI",
    "VIRTUAL_ACCOUNT_BRI",
    "VIRTUAL_ACCOUNT_BNI",
    "VIRTUAL_ACCOUNT_BANK_PERMATA",
    "VIRTUAL_ACCOUNT_BANK_CIMB",
    "VIRTUAL_ACCOUNT_BANK_DANAMON",
    "VIRTUAL_ACCOUNT_BANK_SYARIAH_INDONESIA",
];

const EWALLET: &[&str] = &[
    "EMONEY_OVO",
    "EMONEY_SHOPEE_PAY",
    "EMONEY_DANA",
    "EMONEY_LINKAJA",
];

const RETAIL: &[&str] = &["ONLINE_TO_OFFLINE_ALFA", "ONLINE_TO_OFFLINE_INDOMARET"];

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Qris,
        PaymentMethod::VirtualAccount,
        PaymentMethod::Ewallet,
        PaymentMethod::Retail,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Qris => "QRIS",
            PaymentMethod::VirtualAccount => "VIRTUAL_ACCOUNT",
            PaymentMethod::Ewallet => "EWALLET",
            PaymentMethod::Retail => "RETAIL",
        }
    }

    /// Every gateway channel code offered for this category.
    pub fn channel_codes(self) -> &'static [&'static str] {
        match self {
            PaymentMethod::Qris => QRIS,
            PaymentMethod::VirtualAccount => VIRTUAL_ACCOUNT,
            PaymentMethod::Ewallet => EWALLET,
            PaymentMethod::Retail => RETAIL,
        }
    }

    /// Parses the label a client sent; matching is exact.
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == label)
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
