//! Demo order-fulfillment saga backed by in-memory services.
//!
//! Three forward steps (reserve inventory, charge payment, create
//! shipment) with matching undo operations. Service-assigned IDs flow
//! through the saga payload so compensation can run purely from
//! persisted state.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use orchestrator::{SagaDefinition, SagaStep, StepError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payload of one order-fulfillment saga run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderData {
    pub order_id: Uuid,
    pub customer_id: Uuid,
    pub amount_cents: u64,
    pub reservation_id: Option<String>,
    pub payment_id: Option<String>,
    pub shipment_id: Option<String>,
}

impl OrderData {
    pub fn new(customer_id: Uuid, amount_cents: u64) -> Self {
        Self {
            order_id: Uuid::new_v4(),
            customer_id,
            amount_cents,
            reservation_id: None,
            payment_id: None,
            shipment_id: None,
        }
    }
}

#[derive(Debug, Default)]
struct ServiceState {
    reservations: HashMap<String, Uuid>,
    payments: HashMap<String, u64>,
    shipments: HashMap<String, Uuid>,
    next_id: u32,
    fail_on_reserve: bool,
    fail_on_charge: bool,
    fail_on_ship: bool,
}

/// In-memory stand-ins for the inventory, payment, and shipping services.
#[derive(Debug, Clone, Default)]
pub struct FulfillmentServices {
    state: Arc<RwLock<ServiceState>>,
}

impl FulfillmentServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the payment service to refuse the next charge.
    pub fn set_fail_on_charge(&self, fail: bool) {
        self.state.write().unwrap().fail_on_charge = fail;
    }

    /// Configures the inventory service to refuse the next reservation.
    pub fn set_fail_on_reserve(&self, fail: bool) {
        self.state.write().unwrap().fail_on_reserve = fail;
    }

    /// Configures the shipping service to refuse the next shipment.
    pub fn set_fail_on_ship(&self, fail: bool) {
        self.state.write().unwrap().fail_on_ship = fail;
    }

    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }

    pub fn shipment_count(&self) -> usize {
        self.state.read().unwrap().shipments.len()
    }

    fn next_id(state: &mut ServiceState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}-{}", prefix, state.next_id)
    }
}

struct ReserveInventory {
    services: FulfillmentServices,
}

#[async_trait]
impl SagaStep<OrderData> for ReserveInventory {
    fn name(&self) -> &str {
        "reserve_inventory"
    }

    async fn execute(&self, data: &mut OrderData) -> Result<(), StepError> {
        let mut state = self.services.state.write().unwrap();
        if state.fail_on_reserve {
            return Err(StepError::new("inventory unavailable"));
        }
        let id = FulfillmentServices::next_id(&mut state, "res");
        state.reservations.insert(id.clone(), data.order_id);
        data.reservation_id = Some(id);
        Ok(())
    }

    async fn compensate(&self, data: &mut OrderData) -> Result<(), StepError> {
        if let Some(id) = data.reservation_id.take() {
            self.services.state.write().unwrap().reservations.remove(&id);
        }
        Ok(())
    }
}

struct ChargePayment {
    services: FulfillmentServices,
}

#[async_trait]
impl SagaStep<OrderData> for ChargePayment {
    fn name(&self) -> &str {
        "charge_payment"
    }

    async fn execute(&self, data: &mut OrderData) -> Result<(), StepError> {
        let mut state = self.services.state.write().unwrap();
        if state.fail_on_charge {
            return Err(StepError::new("payment declined"));
        }
        let id = FulfillmentServices::next_id(&mut state, "pay");
        state.payments.insert(id.clone(), data.amount_cents);
        data.payment_id = Some(id);
        Ok(())
    }

    async fn compensate(&self, data: &mut OrderData) -> Result<(), StepError> {
        if let Some(id) = data.payment_id.take() {
            self.services.state.write().unwrap().payments.remove(&id);
        }
        Ok(())
    }
}

struct CreateShipment {
    services: FulfillmentServices,
}

#[async_trait]
impl SagaStep<OrderData> for CreateShipment {
    fn name(&self) -> &str {
        "create_shipment"
    }

    async fn execute(&self, data: &mut OrderData) -> Result<(), StepError> {
        let mut state = self.services.state.write().unwrap();
        if state.fail_on_ship {
            return Err(StepError::new("carrier rejected shipment"));
        }
        let id = FulfillmentServices::next_id(&mut state, "shp");
        state.shipments.insert(id.clone(), data.order_id);
        data.shipment_id = Some(id);
        Ok(())
    }

    async fn compensate(&self, data: &mut OrderData) -> Result<(), StepError> {
        if let Some(id) = data.shipment_id.take() {
            self.services.state.write().unwrap().shipments.remove(&id);
        }
        Ok(())
    }
}

/// Order fulfillment: reserve inventory, charge payment, create shipment.
pub struct OrderFulfillmentSaga {
    services: FulfillmentServices,
}

impl OrderFulfillmentSaga {
    pub fn new(services: FulfillmentServices) -> Self {
        Self { services }
    }
}

impl SagaDefinition for OrderFulfillmentSaga {
    type Data = OrderData;

    fn saga_type() -> &'static str {
        "OrderFulfillment"
    }

    fn steps(&self) -> Vec<Arc<dyn SagaStep<OrderData>>> {
        vec![
            Arc::new(ReserveInventory {
                services: self.services.clone(),
            }),
            Arc::new(ChargePayment {
                services: self.services.clone(),
            }),
            Arc::new(CreateShipment {
                services: self.services.clone(),
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator::{SagaExecutionOptions, SagaOrchestrator, SagaRegistry};
    use state_store::{InMemorySagaStore, SagaStatus};

    fn harness(
        services: FulfillmentServices,
    ) -> SagaOrchestrator<InMemorySagaStore> {
        let mut registry = SagaRegistry::new();
        registry.register(&OrderFulfillmentSaga::new(services));
        SagaOrchestrator::new(Arc::new(InMemorySagaStore::new()), Arc::new(registry))
    }

    #[tokio::test]
    async fn fulfillment_happy_path() {
        let services = FulfillmentServices::new();
        let orchestrator = harness(services.clone());

        let report = orchestrator
            .execute::<OrderFulfillmentSaga>(
                OrderData::new(Uuid::new_v4(), 2499),
                SagaExecutionOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, SagaStatus::Completed);
        let data = report.data.unwrap();
        assert!(data.reservation_id.is_some());
        assert!(data.payment_id.is_some());
        assert!(data.shipment_id.is_some());
        assert_eq!(services.reservation_count(), 1);
        assert_eq!(services.payment_count(), 1);
        assert_eq!(services.shipment_count(), 1);
    }

    #[tokio::test]
    async fn declined_payment_releases_reservation() {
        let services = FulfillmentServices::new();
        services.set_fail_on_charge(true);
        let orchestrator = harness(services.clone());

        let report = orchestrator
            .execute::<OrderFulfillmentSaga>(
                OrderData::new(Uuid::new_v4(), 2499),
                SagaExecutionOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, SagaStatus::Compensated);
        assert_eq!(report.error.as_deref(), Some("payment declined"));
        assert_eq!(services.reservation_count(), 0);
        assert_eq!(services.payment_count(), 0);
        assert_eq!(services.shipment_count(), 0);
    }

    #[tokio::test]
    async fn rejected_shipment_refunds_and_releases() {
        let services = FulfillmentServices::new();
        services.set_fail_on_ship(true);
        let orchestrator = harness(services.clone());

        let report = orchestrator
            .execute::<OrderFulfillmentSaga>(
                OrderData::new(Uuid::new_v4(), 2499),
                SagaExecutionOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, SagaStatus::Compensated);
        assert_eq!(services.reservation_count(), 0);
        assert_eq!(services.payment_count(), 0);
        assert_eq!(services.shipment_count(), 0);
    }
}
