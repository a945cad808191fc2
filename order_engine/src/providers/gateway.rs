use std::{collections::HashMap, fmt::Debug};

use super::{
    AckDecision,
    Acknowledgement,
    CallbackPayload,
    CallbackVerification,
    MomoProvider,
    PayOsProvider,
    PaymentGatewayError,
    PaymentLink,
    PaymentProvider,
    PaymentRequest,
    ProviderStatus,
    StripeProvider,
    ZaloPayProvider,
};
use crate::db_types::ProviderKind;

/// The closed set of gateways the marketplace supports. Dispatch is a plain `match`.
#[derive(Clone)]
pub enum GatewayAdapter {
    MoMo(MomoProvider),
    PayOs(PayOsProvider),
    Stripe(StripeProvider),
    ZaloPay(ZaloPayProvider),
}

impl Debug for GatewayAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GatewayAdapter({})", self.kind())
    }
}

macro_rules! dispatch {
    ($self:ident, $p:ident => $e:expr) => {
        match $self {
            GatewayAdapter::MoMo($p) => $e,
            GatewayAdapter::PayOs($p) => $e,
            GatewayAdapter::Stripe($p) => $e,
            GatewayAdapter::ZaloPay($p) => $e,
        }
    };
}

impl PaymentProvider for GatewayAdapter {
    fn kind(&self) -> ProviderKind {
        dispatch!(self, p => p.kind())
    }

    fn signature_header(&self) -> Option<&'static str> {
        dispatch!(self, p => p.signature_header())
    }

    async fn create_payment_request(&self, request: &PaymentRequest) -> Result<PaymentLink, PaymentGatewayError> {
        dispatch!(self, p => p.create_payment_request(request).await)
    }

    fn verify_callback(&self, payload: &CallbackPayload) -> CallbackVerification {
        dispatch!(self, p => p.verify_callback(payload))
    }

    async fn query_status(&self, correlation_id: &str) -> Result<Option<ProviderStatus>, PaymentGatewayError> {
        dispatch!(self, p => p.query_status(correlation_id).await)
    }

    fn acknowledge(&self, decision: AckDecision) -> Acknowledgement {
        dispatch!(self, p => p.acknowledge(decision))
    }
}

/// The configured providers, keyed by kind. A provider that is not registered cannot be used for checkout, and its
/// callbacks are rejected.
#[derive(Clone)]
pub struct PaymentProviders<P> {
    providers: HashMap<ProviderKind, P>,
}

impl<P> Default for PaymentProviders<P> {
    fn default() -> Self {
        Self { providers: HashMap::new() }
    }
}

impl<P: PaymentProvider> PaymentProviders<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: P) -> Self {
        self.register(provider);
        self
    }

    pub fn register(&mut self, provider: P) {
        self.providers.insert(provider.kind(), provider);
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&P> {
        self.providers.get(&kind)
    }

    pub fn kinds(&self) -> Vec<ProviderKind> {
        ProviderKind::ALL.into_iter().filter(|k| self.providers.contains_key(k)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl<P> Debug for PaymentProviders<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self.providers.keys().map(|k| k.to_string()).collect::<Vec<_>>();
        write!(f, "PaymentProviders({})", kinds.join(", "))
    }
}
