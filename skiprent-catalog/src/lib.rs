pub mod catalog;
pub mod pricing;
pub mod tariff;

pub use catalog::{CatalogError, InMemoryTariffCatalog, TariffCatalog};
pub use pricing::{
    ImmediateLoading, PriceBreakdown, PriceCalculator, PricingError, QuoteRequest, TariffSnapshot,
    WasteSelection,
};
pub use tariff::{
    BankDeposit, RentalPricing, RentalTier, Service, TransportPricing, TreatmentCode,
    TreatmentPricing, WasteType,
};
