use crate::tariff::{BankDeposit, RentalPricing, Service, TransportPricing, TreatmentPricing, WasteType};
use async_trait::async_trait;
use skiprent_core::{Amount, StoreError, StoreResult};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Read-only view of the currently active tariff rows.
///
/// Implementations only ever return rows with `is_active = true`; soft-deleted
/// rows are invisible. None of the methods have side effects.
#[async_trait]
pub trait TariffCatalog: Send + Sync {
    async fn service(&self, service_id: Uuid) -> StoreResult<Option<Service>>;

    async fn rental_rate_for(&self, service_id: Uuid) -> StoreResult<Option<RentalPricing>>;

    async fn transport_rate(&self) -> StoreResult<Option<TransportPricing>>;

    async fn treatment_rate_for(&self, waste_type_id: Uuid) -> StoreResult<Option<TreatmentPricing>>;

    async fn deposit_for(&self, service_id: Uuid, waste_type_id: Uuid) -> StoreResult<Option<Amount>>;
}

#[derive(Default)]
struct Tables {
    services: HashMap<Uuid, Service>,
    waste_types: HashMap<Uuid, WasteType>,
    rentals: Vec<RentalPricing>,
    transports: Vec<TransportPricing>,
    treatments: Vec<TreatmentPricing>,
    deposits: Vec<BankDeposit>,
}

/// In-memory tariff tables, used by the quote simulator and tests
#[derive(Default)]
pub struct InMemoryTariffCatalog {
    tables: RwLock<Tables>,
}

impl InMemoryTariffCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_service(&self, service: Service) {
        self.write().services.insert(service.id, service);
    }

    pub fn add_waste_type(&self, waste_type: WasteType) {
        self.write().waste_types.insert(waste_type.id, waste_type);
    }

    pub fn list_waste_types(&self) -> Vec<WasteType> {
        self.read().waste_types.values().filter(|w| w.is_active).cloned().collect()
    }

    /// Replace the active rental tariff of a service; the previous one is soft-deleted.
    pub fn set_rental(&self, pricing: RentalPricing) -> Result<(), CatalogError> {
        pricing.validate().map_err(CatalogError::Invalid)?;
        let mut tables = self.write();
        for existing in tables.rentals.iter_mut().filter(|r| r.service_id == pricing.service_id) {
            existing.is_active = false;
        }
        tables.rentals.push(pricing);
        Ok(())
    }

    /// Replace the global transport tariff; the previous one is soft-deleted.
    pub fn set_transport(&self, pricing: TransportPricing) {
        let mut tables = self.write();
        for existing in tables.transports.iter_mut() {
            existing.is_active = false;
        }
        tables.transports.push(pricing);
    }

    /// Register a treatment tariff. A waste type may have only one active row.
    pub fn add_treatment(&self, pricing: TreatmentPricing) -> Result<(), CatalogError> {
        let mut tables = self.write();
        if pricing.is_active
            && tables
                .treatments
                .iter()
                .any(|t| t.is_active && t.waste_type_id == pricing.waste_type_id)
        {
            return Err(CatalogError::DuplicateActiveTreatment(pricing.waste_type_id));
        }
        tables.treatments.push(pricing);
        Ok(())
    }

    pub fn deactivate_treatment(&self, waste_type_id: Uuid) -> bool {
        let mut tables = self.write();
        let mut changed = false;
        for row in tables.treatments.iter_mut().filter(|t| t.waste_type_id == waste_type_id && t.is_active) {
            row.is_active = false;
            changed = true;
        }
        changed
    }

    pub fn set_deposit(&self, deposit: BankDeposit) {
        let mut tables = self.write();
        for existing in tables
            .deposits
            .iter_mut()
            .filter(|d| d.service_id == deposit.service_id && d.waste_type_id == deposit.waste_type_id)
        {
            existing.is_active = false;
        }
        tables.deposits.push(deposit);
    }
}

#[async_trait]
impl TariffCatalog for InMemoryTariffCatalog {
    async fn service(&self, service_id: Uuid) -> StoreResult<Option<Service>> {
        Ok(self.read().services.get(&service_id).filter(|s| s.is_active).cloned())
    }

    async fn rental_rate_for(&self, service_id: Uuid) -> StoreResult<Option<RentalPricing>> {
        Ok(self
            .read()
            .rentals
            .iter()
            .find(|r| r.is_active && r.service_id == service_id)
            .cloned())
    }

    async fn transport_rate(&self) -> StoreResult<Option<TransportPricing>> {
        Ok(self.read().transports.iter().find(|t| t.is_active).cloned())
    }

    async fn treatment_rate_for(&self, waste_type_id: Uuid) -> StoreResult<Option<TreatmentPricing>> {
        let tables = self.read();
        let mut active = tables
            .treatments
            .iter()
            .filter(|t| t.is_active && t.waste_type_id == waste_type_id);
        let first = active.next().cloned();
        if active.next().is_some() {
            return Err(StoreError::Corrupt(format!(
                "several active treatment rows for waste type {waste_type_id}"
            )));
        }
        Ok(first)
    }

    async fn deposit_for(&self, service_id: Uuid, waste_type_id: Uuid) -> StoreResult<Option<Amount>> {
        Ok(self
            .read()
            .deposits
            .iter()
            .find(|d| d.is_active && d.service_id == service_id && d.waste_type_id == waste_type_id)
            .map(|d| d.deposit_amount))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Invalid tariff: {0}")]
    Invalid(String),

    #[error("Waste type {0} already has an active treatment tariff")]
    DuplicateActiveTreatment(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tariff::{RentalTier, TreatmentCode};
    use rust_decimal_macros::dec;

    fn service() -> Service {
        Service {
            id: Uuid::new_v4(),
            name: "Benne 10m3".to_string(),
            volume_m3: 10,
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_only_active_rows_are_returned() {
        let catalog = InMemoryTariffCatalog::new();
        let service = service();
        catalog.add_service(service.clone());

        catalog.set_rental(RentalPricing::new(service.id, dec!(15), 0, vec![])).unwrap();
        catalog.set_rental(RentalPricing::new(service.id, dec!(18), 0, vec![])).unwrap();

        let rental = catalog.rental_rate_for(service.id).await.unwrap().unwrap();
        assert_eq!(rental.daily_rate, dec!(18));

        catalog.set_transport(TransportPricing::new(dec!(2), dec!(30), dec!(0)));
        catalog.set_transport(TransportPricing::new(dec!(3), dec!(35), dec!(0)));
        let transport = catalog.transport_rate().await.unwrap().unwrap();
        assert_eq!(transport.price_per_km, dec!(3));
    }

    #[tokio::test]
    async fn test_inactive_service_is_invisible() {
        let catalog = InMemoryTariffCatalog::new();
        let mut service = service();
        service.is_active = false;
        catalog.add_service(service.clone());

        assert!(catalog.service(service.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_one_active_treatment_per_waste_type() {
        let catalog = InMemoryTariffCatalog::new();
        let waste_type_id = Uuid::new_v4();

        catalog
            .add_treatment(TreatmentPricing::new(waste_type_id, dec!(50), TreatmentCode::R5, "ZI Nord"))
            .unwrap();
        let duplicate =
            catalog.add_treatment(TreatmentPricing::new(waste_type_id, dec!(60), TreatmentCode::D5, "ZI Sud"));
        assert!(matches!(duplicate, Err(CatalogError::DuplicateActiveTreatment(_))));

        assert!(catalog.deactivate_treatment(waste_type_id));
        assert!(catalog.treatment_rate_for(waste_type_id).await.unwrap().is_none());

        catalog
            .add_treatment(TreatmentPricing::new(waste_type_id, dec!(60), TreatmentCode::D5, "ZI Sud"))
            .unwrap();
        let active = catalog.treatment_rate_for(waste_type_id).await.unwrap().unwrap();
        assert_eq!(active.price_per_ton, dec!(60));
    }

    #[tokio::test]
    async fn test_invalid_rental_is_rejected() {
        let catalog = InMemoryTariffCatalog::new();
        let pricing = RentalPricing::new(
            Uuid::new_v4(),
            dec!(15),
            0,
            vec![
                RentalTier { threshold_days: 10, supplement_per_day: dec!(2) },
                RentalTier { threshold_days: 5, supplement_per_day: dec!(2) },
            ],
        );
        assert!(matches!(catalog.set_rental(pricing), Err(CatalogError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_deposit_lookup() {
        let catalog = InMemoryTariffCatalog::new();
        let service_id = Uuid::new_v4();
        let waste_type_id = Uuid::new_v4();

        assert!(catalog.deposit_for(service_id, waste_type_id).await.unwrap().is_none());

        catalog.set_deposit(BankDeposit::new(service_id, waste_type_id, dec!(200)));
        catalog.set_deposit(BankDeposit::new(service_id, waste_type_id, dec!(250)));
        assert_eq!(catalog.deposit_for(service_id, waste_type_id).await.unwrap(), Some(dec!(250)));
    }
}
