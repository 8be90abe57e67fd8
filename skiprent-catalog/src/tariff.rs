use serde::{Deserialize, Serialize};
use skiprent_core::money::{is_negative, Amount};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Rentable container definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub id: Uuid,
    pub name: String,
    pub volume_m3: u32,
    pub is_active: bool,
}

/// Named waste category (rubble, green waste, mixed DIB, ...)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WasteType {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

/// A duration breakpoint: billable days past `threshold_days` cost an extra
/// `supplement_per_day`, on top of every lower tier's supplement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentalTier {
    pub threshold_days: u32,
    pub supplement_per_day: Amount,
}

pub const MAX_RENTAL_TIERS: usize = 3;

/// Per-service daily rental tariff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RentalPricing {
    pub id: Uuid,
    pub service_id: Uuid,
    pub daily_rate: Amount,
    /// Days included before billing starts
    pub billing_start_day: u32,
    pub tiers: Vec<RentalTier>,
    pub is_active: bool,
}

impl RentalPricing {
    pub fn new(service_id: Uuid, daily_rate: Amount, billing_start_day: u32, tiers: Vec<RentalTier>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            daily_rate,
            billing_start_day,
            tiers,
            is_active: true,
        }
    }

    pub fn billable_days(&self, duration_days: u32) -> u32 {
        duration_days.saturating_sub(self.billing_start_day)
    }

    /// Thresholds strictly increasing, supplements and rate non-negative, at most three tiers.
    pub fn validate(&self) -> Result<(), String> {
        if is_negative(self.daily_rate) {
            return Err(format!("rental pricing {}: negative daily rate", self.id));
        }
        if self.tiers.len() > MAX_RENTAL_TIERS {
            return Err(format!(
                "rental pricing {}: {} tiers, at most {} allowed",
                self.id,
                self.tiers.len(),
                MAX_RENTAL_TIERS
            ));
        }
        let mut previous: Option<u32> = None;
        for tier in &self.tiers {
            if is_negative(tier.supplement_per_day) {
                return Err(format!(
                    "rental pricing {}: negative supplement at {} days",
                    self.id, tier.threshold_days
                ));
            }
            if let Some(prev) = previous {
                if tier.threshold_days <= prev {
                    return Err(format!(
                        "rental pricing {}: thresholds must increase ({} after {})",
                        self.id, tier.threshold_days, prev
                    ));
                }
            }
            previous = Some(tier.threshold_days);
        }
        Ok(())
    }
}

/// The single global transport tariff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportPricing {
    pub id: Uuid,
    pub price_per_km: Amount,
    pub minimum_flat_rate: Amount,
    /// Hourly rate for loading while the truck waits; zero disables the option
    pub hourly_rate: Amount,
    pub is_active: bool,
}

impl TransportPricing {
    pub fn new(price_per_km: Amount, minimum_flat_rate: Amount, hourly_rate: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            price_per_km,
            minimum_flat_rate,
            hourly_rate,
            is_active: true,
        }
    }

    pub fn immediate_loading_enabled(&self) -> bool {
        self.hourly_rate > Amount::ZERO
    }
}

macro_rules! treatment_codes {
    ($($code:ident),+ $(,)?) => {
        /// Waste framework disposal (D) and recovery (R) operation codes.
        #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
        pub enum TreatmentCode {
            $($code),+
        }

        impl TreatmentCode {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(TreatmentCode::$code => stringify!($code)),+
                }
            }
        }

        impl FromStr for TreatmentCode {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == stringify!($code) {
                        return Ok(TreatmentCode::$code);
                    }
                )+
                Err(format!("unknown treatment code {s}"))
            }
        }
    };
}

treatment_codes!(
    R1, R2, R3, R4, R5, R6, R7, R8, R9, R10, R11, R12, R13,
    D1, D2, D3, D4, D5, D6, D7, D8, D9, D10, D11, D12, D13, D14, D15,
);

impl TreatmentCode {
    pub fn is_recovery(&self) -> bool {
        self.as_str().starts_with('R')
    }
}

impl fmt::Display for TreatmentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per waste type treatment tariff
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreatmentPricing {
    pub id: Uuid,
    pub waste_type_id: Uuid,
    pub price_per_ton: Amount,
    pub treatment_code: TreatmentCode,
    pub outlet_address: String,
    pub is_active: bool,
}

impl TreatmentPricing {
    pub fn new(waste_type_id: Uuid, price_per_ton: Amount, treatment_code: TreatmentCode, outlet_address: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            waste_type_id,
            price_per_ton,
            treatment_code,
            outlet_address: outlet_address.to_string(),
            is_active: true,
        }
    }
}

/// Refundable caution held per (service, waste type)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BankDeposit {
    pub id: Uuid,
    pub service_id: Uuid,
    pub waste_type_id: Uuid,
    pub deposit_amount: Amount,
    pub is_active: bool,
}

impl BankDeposit {
    pub fn new(service_id: Uuid, waste_type_id: Uuid, deposit_amount: Amount) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            waste_type_id,
            deposit_amount,
            is_active: true,
        }
    }
}
