use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{GatewayError, PaymentIntent, PaymentIntentPage, PaymentIntentRequest, PaymentIntentStatus};
use crate::ports::PaymentGateway;

#[derive(Default)]
struct MockState {
    intents: HashMap<String, PaymentIntent>,
    /// Creation order, newest last.
    order: Vec<String>,
    by_idempotency_key: HashMap<String, String>,
    next_failure: Option<GatewayError>,
    create_calls: usize,
    retrieve_calls: usize,
}

/// In-process gateway that behaves like the real one closely enough for the
/// settlement workflow: idempotency keys, intent statuses, newest-first lists.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<Mutex<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Simulates the consumer completing the payment on the client side.
    pub fn complete_payment(&self, intent_id: &str) {
        self.set_status(intent_id, PaymentIntentStatus::Succeeded);
    }

    pub fn set_status(&self, intent_id: &str, status: PaymentIntentStatus) {
        if let Some(intent) = self.lock().intents.get_mut(intent_id) {
            intent.status = status;
        }
    }

    /// Inserts an intent directly, as if created by another system.
    pub fn insert_intent(&self, intent: PaymentIntent) {
        let mut state = self.lock();
        state.order.push(intent.id.clone());
        state.intents.insert(intent.id.clone(), intent);
    }

    /// The next call fails with `error`.
    pub fn fail_next(&self, error: GatewayError) {
        self.lock().next_failure = Some(error);
    }

    pub fn create_calls(&self) -> usize {
        self.lock().create_calls
    }

    pub fn retrieve_calls(&self) -> usize {
        self.lock().retrieve_calls
    }

    pub fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        self.lock().intents.get(intent_id).cloned()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.lock();
        state.create_calls += 1;
        if let Some(error) = state.next_failure.take() {
            return Err(error);
        }

        if let Some(existing) = state
            .by_idempotency_key
            .get(&request.idempotency_key)
            .and_then(|id| state.intents.get(id))
        {
            return Ok(existing.clone());
        }

        let id = format!("pi_mock_{}", state.order.len() + 1);
        let intent = PaymentIntent {
            id: id.clone(),
            amount: request.amount,
            currency: request.currency.clone(),
            status: PaymentIntentStatus::RequiresPaymentMethod,
            client_secret: Some(format!("{}_secret_{}", id, state.order.len() + 1)),
            metadata: request.metadata.iter().cloned().collect(),
            created: Utc::now().timestamp(),
        };
        state.order.push(id.clone());
        state
            .by_idempotency_key
            .insert(request.idempotency_key.clone(), id.clone());
        state.intents.insert(id, intent.clone());
        Ok(intent)
    }

    async fn retrieve_payment_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.lock();
        state.retrieve_calls += 1;
        if let Some(error) = state.next_failure.take() {
            return Err(error);
        }

        state
            .intents
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(format!("No such payment_intent: {}", id)))
    }

    async fn list_payment_intents(
        &self,
        limit: u32,
        starting_after: Option<&str>,
    ) -> Result<PaymentIntentPage, GatewayError> {
        let mut state = self.lock();
        if let Some(error) = state.next_failure.take() {
            return Err(error);
        }

        let newest_first: Vec<&String> = state.order.iter().rev().collect();
        let start = match starting_after {
            Some(cursor) => newest_first
                .iter()
                .position(|id| id.as_str() == cursor)
                .map(|pos| pos + 1)
                .unwrap_or(newest_first.len()),
            None => 0,
        };

        let data: Vec<PaymentIntent> = newest_first
            .iter()
            .skip(start)
            .take(limit as usize)
            .filter_map(|id| state.intents.get(*id).cloned())
            .collect();
        let has_more = start + data.len() < newest_first.len();

        Ok(PaymentIntentPage { data, has_more })
    }
}
