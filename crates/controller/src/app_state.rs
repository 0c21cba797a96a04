use std::sync::Arc;

use crate::dispatcher::Dispatcher;
use crate::persistence::Store;
use crate::pki::RootCa;
use crate::registry::AgentRegistry;

/// Shared application state passed into HTTP and gRPC handlers.
#[derive(Clone)]
pub struct AppState {
    /// The persistence port.
    pub store: Store,
    /// The root certificate authority.
    pub ca: Arc<RootCa>,
    /// The reverse-dial registry.
    pub registry: AgentRegistry,
    /// The orchestration dispatcher.
    pub dispatcher: Arc<Dispatcher>,
}

#[allow(dead_code)]
fn _assert_app_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
