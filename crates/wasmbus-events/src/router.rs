use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use wasmbus::Message;

use crate::{Event, EventError, EventHandler, FromBusEvent};

/// Demultiplexer for lattice events.
///
/// A router fans every event out to **all** registered routes, letting each
/// route filter independently on the concrete body type; it is not a
/// first-match dispatcher. Routes can be added and removed while a
/// subscription is dispatching: routes added mid-flight may or may not see
/// the current event, removed routes stop seeing events once removal
/// returns.
#[derive(Default)]
pub struct Router {
    routes: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route under an identifier. An existing route with the same
    /// identifier is left in place.
    pub fn add_route(&self, identifier: impl Into<String>, route: impl EventHandler + 'static) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(identifier.into())
            .or_insert_with(|| Arc::new(route));
    }

    pub fn remove_route(&self, identifier: &str) {
        self.routes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identifier);
    }
}

impl EventHandler for Router {
    fn handle_event(&self, event: &Event) {
        let routes: Vec<Arc<dyn EventHandler>> = self
            .routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for route in routes {
            route.handle_event(event);
        }
    }

    fn handle_error(&self, _msg: &Message, _error: &EventError) {
        // serialization errors are discarded
    }
}

/// A typed route: fires the callback only for events whose body is `T`.
pub fn route<T, F>(callback: F) -> impl EventHandler
where
    T: FromBusEvent + Send + Sync + 'static,
    F: Fn(&T) + Send + Sync + 'static,
{
    crate::DiscardErrorsHandler(move |event: &Event| {
        if let Some(typed) = T::from_bus_event(&event.bus_event) {
            callback(typed);
        }
    })
}
