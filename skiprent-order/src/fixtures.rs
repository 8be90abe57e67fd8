use crate::models::{CheckoutRequest, DeliveryAddress, Order};
use chrono::Utc;
use rust_decimal_macros::dec;
use skiprent_catalog::{
    BankDeposit, InMemoryTariffCatalog, PriceCalculator, QuoteRequest, RentalPricing, Service, TransportPricing,
    TreatmentCode, TreatmentPricing, WasteSelection, WasteType,
};
use std::sync::Arc;
use uuid::Uuid;

pub struct Tariffs {
    pub catalog: Arc<InMemoryTariffCatalog>,
    pub service_id: Uuid,
    pub waste_type_id: Uuid,
}

/// 10m3 skip at 15/day, 1.5/km transport with a 30 floor, rubble at 50/t
pub fn tariffs() -> Tariffs {
    let catalog = InMemoryTariffCatalog::new();
    let service_id = Uuid::new_v4();
    let waste_type_id = Uuid::new_v4();

    catalog.add_service(Service {
        id: service_id,
        name: "Benne 10m3".to_string(),
        volume_m3: 10,
        is_active: true,
    });
    catalog.add_waste_type(WasteType {
        id: waste_type_id,
        name: "Gravats".to_string(),
        is_active: true,
    });
    catalog
        .set_rental(RentalPricing::new(service_id, dec!(15), 0, vec![]))
        .expect("valid rental");
    catalog.set_transport(TransportPricing::new(dec!(1.5), dec!(30), dec!(45)));
    catalog
        .add_treatment(TreatmentPricing::new(waste_type_id, dec!(50), TreatmentCode::R5, "ZI Nord"))
        .expect("single treatment row");
    catalog.set_deposit(BankDeposit::new(service_id, waste_type_id, dec!(300)));

    Tariffs {
        catalog: Arc::new(catalog),
        service_id,
        waste_type_id,
    }
}

pub fn checkout(tariffs: &Tariffs) -> CheckoutRequest {
    CheckoutRequest {
        customer_id: None,
        customer_email: "client@example.com".to_string(),
        delivery_address: DeliveryAddress {
            street: "1 quai de la Fosse".to_string(),
            postal_code: "44000".to_string(),
            city: "Nantes".to_string(),
            access_notes: None,
        },
        estimated_delivery_date: None,
        quote: QuoteRequest {
            service_id: tariffs.service_id,
            duration_days: 7,
            distance_km: dec!(20),
            waste_selections: vec![WasteSelection {
                waste_type_id: tariffs.waste_type_id,
                weight_kg: dec!(2000),
            }],
            immediate_loading: None,
            require_treatment_pricing: false,
        },
    }
}

pub async fn order() -> Order {
    let tariffs = tariffs();
    let checkout = checkout(&tariffs);
    let price = PriceCalculator::default()
        .quote(tariffs.catalog.as_ref(), &checkout.quote)
        .await
        .expect("fixture prices");
    Order::new(&checkout, price, Utc::now())
}
