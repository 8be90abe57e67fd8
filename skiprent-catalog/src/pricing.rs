use crate::catalog::TariffCatalog;
use crate::tariff::{RentalPricing, Service, TransportPricing, TreatmentCode, TreatmentPricing};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use skiprent_core::money::{is_negative, vat_on, DEFAULT_VAT_RATE};
use skiprent_core::{Amount, StoreError};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

const KG_PER_TON: Decimal = dec!(1000);
const ROUND_TRIP: Decimal = dec!(2);

/// One waste type picked by the customer with its estimated weight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WasteSelection {
    pub waste_type_id: Uuid,
    pub weight_kg: Decimal,
}

/// Loading while the truck waits on site
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImmediateLoading {
    pub hours: Decimal,
}

/// Everything the calculator needs to price an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuoteRequest {
    pub service_id: Uuid,
    pub duration_days: u32,
    pub distance_km: Decimal,
    #[serde(default)]
    pub waste_selections: Vec<WasteSelection>,
    #[serde(default)]
    pub immediate_loading: Option<ImmediateLoading>,
    /// Fail instead of skipping waste types that have no treatment tariff
    #[serde(default)]
    pub require_treatment_pricing: bool,
}

impl QuoteRequest {
    pub fn validate(&self) -> Result<(), PricingError> {
        if self.duration_days < 1 {
            return Err(PricingError::InvalidInput("duration_days must be at least 1".to_string()));
        }
        if is_negative(self.distance_km) {
            return Err(PricingError::InvalidInput("distance_km must not be negative".to_string()));
        }
        for selection in &self.waste_selections {
            if is_negative(selection.weight_kg) {
                return Err(PricingError::InvalidInput(format!(
                    "weight_kg for waste type {} must not be negative",
                    selection.waste_type_id
                )));
            }
        }
        if let Some(loading) = &self.immediate_loading {
            if is_negative(loading.hours) {
                return Err(PricingError::InvalidInput("immediate loading hours must not be negative".to_string()));
            }
        }
        Ok(())
    }

    /// Selected waste types, first occurrence order, without duplicates
    pub fn waste_type_ids(&self) -> Vec<Uuid> {
        let mut seen = HashSet::new();
        self.waste_selections
            .iter()
            .map(|s| s.waste_type_id)
            .filter(|id| seen.insert(*id))
            .collect()
    }
}

/// The tariff rows a quote was computed from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TariffSnapshot {
    pub service: Service,
    pub rental: RentalPricing,
    pub transport: TransportPricing,
    pub treatments: BTreeMap<Uuid, TreatmentPricing>,
    pub deposits: BTreeMap<Uuid, Amount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreatmentLine {
    pub waste_type_id: Uuid,
    pub weight_kg: Decimal,
    pub price_per_ton: Amount,
    pub treatment_code: TreatmentCode,
    pub cost: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepositLine {
    pub waste_type_id: Uuid,
    pub amount: Amount,
}

/// Priced order. The deposit is reported beside the totals, never inside them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PriceBreakdown {
    pub service_id: Uuid,
    pub duration_days: u32,
    pub billable_days: u32,
    pub rental_cost: Amount,
    /// Part of `rental_cost` that comes from tier supplements
    pub rental_supplement_cost: Amount,
    pub transport_cost: Amount,
    pub immediate_loading_cost: Amount,
    pub treatment_cost: Amount,
    pub treatment_lines: Vec<TreatmentLine>,
    /// Selected waste types that had no treatment tariff and were left out
    pub unpriced_waste_types: Vec<Uuid>,
    pub deposit_lines: Vec<DepositLine>,
    pub deposit_total: Amount,
    pub total_ht: Amount,
    pub vat_rate: Decimal,
    pub vat: Amount,
    pub total_ttc: Amount,
}

impl PriceBreakdown {
    /// Billable days at the daily rate
    pub fn base_price(&self) -> Amount {
        self.rental_cost - self.rental_supplement_cost
    }

    /// Tier supplements earned by the length of the rental
    pub fn duration_price(&self) -> Amount {
        self.rental_supplement_cost
    }

    pub fn delivery_fee(&self) -> Amount {
        self.transport_cost + self.immediate_loading_cost
    }
}

/// Turns tariff tables into a price breakdown.
///
/// `resolve` does the catalog lookups, `compute` is pure. `quote` is what both
/// checkout and the public simulator call.
#[derive(Debug, Clone)]
pub struct PriceCalculator {
    vat_rate: Decimal,
}

impl Default for PriceCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_VAT_RATE)
    }
}

impl PriceCalculator {
    pub fn new(vat_rate: Decimal) -> Self {
        Self { vat_rate }
    }

    pub fn vat_rate(&self) -> Decimal {
        self.vat_rate
    }

    pub async fn quote(&self, catalog: &dyn TariffCatalog, input: &QuoteRequest) -> Result<PriceBreakdown, PricingError> {
        let snapshot = self.resolve(catalog, input).await?;
        self.compute(&snapshot, input)
    }

    /// Load every active tariff row `input` touches
    pub async fn resolve(&self, catalog: &dyn TariffCatalog, input: &QuoteRequest) -> Result<TariffSnapshot, PricingError> {
        input.validate()?;

        let service = catalog
            .service(input.service_id)
            .await?
            .ok_or(PricingError::ServiceNotFound(input.service_id))?;

        let rental = catalog.rental_rate_for(service.id).await?.ok_or_else(|| {
            PricingError::TariffNotConfigured(format!("no rental pricing for service {}", service.id))
        })?;

        let transport = catalog
            .transport_rate()
            .await?
            .ok_or_else(|| PricingError::TariffNotConfigured("no active transport pricing".to_string()))?;

        let mut treatments = BTreeMap::new();
        let mut deposits = BTreeMap::new();
        for waste_type_id in input.waste_type_ids() {
            match catalog.treatment_rate_for(waste_type_id).await? {
                Some(pricing) => {
                    treatments.insert(waste_type_id, pricing);
                }
                None if input.require_treatment_pricing => {
                    return Err(PricingError::TariffNotConfigured(format!(
                        "no treatment pricing for waste type {waste_type_id}"
                    )));
                }
                None => {}
            }
            if let Some(amount) = catalog.deposit_for(service.id, waste_type_id).await? {
                deposits.insert(waste_type_id, amount);
            }
        }

        Ok(TariffSnapshot {
            service,
            rental,
            transport,
            treatments,
            deposits,
        })
    }

    pub fn compute(&self, snapshot: &TariffSnapshot, input: &QuoteRequest) -> Result<PriceBreakdown, PricingError> {
        input.validate()?;
        snapshot.rental.validate().map_err(PricingError::InvalidTariff)?;

        let billable_days = snapshot.rental.billable_days(input.duration_days);
        let rental = rental_parts(&snapshot.rental, input.duration_days).ok_or_else(|| out_of_range("rental"))?;
        let rental_cost = rental.total().ok_or_else(|| out_of_range("rental"))?;
        let transport_cost =
            transport_cost(&snapshot.transport, input.distance_km).ok_or_else(|| out_of_range("transport"))?;
        let immediate_loading_cost = immediate_loading_cost(&snapshot.transport, input.immediate_loading.as_ref())
            .ok_or_else(|| out_of_range("immediate loading"))?;

        let mut treatment_lines = Vec::new();
        let mut unpriced_waste_types = Vec::new();
        for selection in &input.waste_selections {
            match snapshot.treatments.get(&selection.waste_type_id) {
                Some(pricing) => treatment_lines.push(TreatmentLine {
                    waste_type_id: selection.waste_type_id,
                    weight_kg: selection.weight_kg,
                    price_per_ton: pricing.price_per_ton,
                    treatment_code: pricing.treatment_code,
                    cost: treatment_cost(pricing, selection.weight_kg)
                        .ok_or_else(|| out_of_range("treatment"))?,
                }),
                None if input.require_treatment_pricing => {
                    return Err(PricingError::TariffNotConfigured(format!(
                        "no treatment pricing for waste type {}",
                        selection.waste_type_id
                    )));
                }
                None => unpriced_waste_types.push(selection.waste_type_id),
            }
        }
        if !unpriced_waste_types.is_empty() {
            tracing::warn!(
                service_id = %input.service_id,
                unpriced = unpriced_waste_types.len(),
                "Waste types without treatment tariff left out of quote"
            );
        }
        let treatment_cost =
            checked_sum(treatment_lines.iter().map(|l| l.cost)).ok_or_else(|| out_of_range("treatment"))?;

        let deposit_lines: Vec<DepositLine> = input
            .waste_type_ids()
            .into_iter()
            .filter_map(|id| {
                snapshot.deposits.get(&id).map(|amount| DepositLine {
                    waste_type_id: id,
                    amount: *amount,
                })
            })
            .collect();
        let deposit_total =
            checked_sum(deposit_lines.iter().map(|l| l.amount)).ok_or_else(|| out_of_range("deposit"))?;

        let total_ht = checked_sum([rental_cost, transport_cost, immediate_loading_cost, treatment_cost])
            .ok_or_else(|| out_of_range("total"))?;
        let vat = vat_on(total_ht, self.vat_rate).ok_or_else(|| out_of_range("vat"))?;
        let total_ttc = total_ht.checked_add(vat).ok_or_else(|| out_of_range("total"))?;

        Ok(PriceBreakdown {
            service_id: snapshot.service.id,
            duration_days: input.duration_days,
            billable_days,
            rental_cost,
            rental_supplement_cost: rental.supplements,
            transport_cost,
            immediate_loading_cost,
            treatment_cost,
            treatment_lines,
            unpriced_waste_types,
            deposit_lines,
            deposit_total,
            total_ht,
            vat_rate: self.vat_rate,
            vat,
            total_ttc,
        })
    }
}

fn out_of_range(component: &str) -> PricingError {
    PricingError::InvalidInput(format!("{component} cost is out of range"))
}

fn checked_sum(amounts: impl IntoIterator<Item = Amount>) -> Option<Amount> {
    amounts.into_iter().try_fold(Amount::ZERO, |acc, amount| acc.checked_add(amount))
}

/// Rental cost split into the daily-rate part and the tier supplements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RentalParts {
    pub daily: Amount,
    pub supplements: Amount,
}

impl RentalParts {
    pub fn total(&self) -> Option<Amount> {
        self.daily.checked_add(self.supplements)
    }
}

/// Every billable day pays the daily rate; each tier adds its supplement to
/// the days past its threshold, so supplements stack as the rental grows.
/// `None` when the amounts overflow.
pub fn rental_parts(pricing: &RentalPricing, duration_days: u32) -> Option<RentalParts> {
    let billable = pricing.billable_days(duration_days);
    let daily = pricing.daily_rate.checked_mul(Decimal::from(billable))?;
    let mut supplements = Amount::ZERO;
    for tier in &pricing.tiers {
        if billable > tier.threshold_days {
            let extra = tier.supplement_per_day.checked_mul(Decimal::from(billable - tier.threshold_days))?;
            supplements = supplements.checked_add(extra)?;
        }
    }
    Some(RentalParts { daily, supplements })
}

pub fn rental_cost(pricing: &RentalPricing, duration_days: u32) -> Option<Amount> {
    rental_parts(pricing, duration_days)?.total()
}

/// Round trip distance, floored at the flat minimum
pub fn transport_cost(pricing: &TransportPricing, distance_km: Decimal) -> Option<Amount> {
    let raw = distance_km.checked_mul(pricing.price_per_km)?.checked_mul(ROUND_TRIP)?;
    Some(raw.max(pricing.minimum_flat_rate))
}

/// At least one hour is billed once loading is requested
pub fn immediate_loading_cost(pricing: &TransportPricing, request: Option<&ImmediateLoading>) -> Option<Amount> {
    match request {
        Some(loading) if pricing.immediate_loading_enabled() => {
            pricing.hourly_rate.checked_mul(loading.hours.max(Decimal::ONE))
        }
        _ => Some(Amount::ZERO),
    }
}

pub fn treatment_cost(pricing: &TreatmentPricing, weight_kg: Decimal) -> Option<Amount> {
    weight_kg.checked_div(KG_PER_TON)?.checked_mul(pricing.price_per_ton)
}

#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    #[error("Tariff not configured: {0}")]
    TariffNotConfigured(String),

    #[error("Invalid tariff: {0}")]
    InvalidTariff(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
