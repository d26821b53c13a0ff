use patrol_core::backend::StoreBackend;
use patrol_core::engine::FindingsEngine;
use patrol_core::scope::ScopeSelection;
use patrol_core::store::FindingsStore;
use std::cell::RefCell;
use std::rc::Rc;

/// Desk-side application state: the client engine over the local store
/// backend, plus the operator's current resource scope. Single-threaded
/// by construction.
#[derive(Clone)]
pub struct AppState {
    pub engine: FindingsEngine<StoreBackend>,
    pub store: FindingsStore,
    pub scope: Rc<RefCell<ScopeSelection>>,
}
