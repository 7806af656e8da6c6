//! Shared setup for integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use campus_events::{AppState, Config, Event, EventId};
use campus_runtime::InMemoryDocumentStore;
use campus_testing::{FixedClock, RecordingNotifier, test_clock};
use std::collections::HashMap;
use std::sync::Arc;

/// App state over in-memory collaborators
pub struct TestApp {
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
}

/// Config from explicit pairs, defaults for everything else
pub fn config(pairs: &[(&str, &str)]) -> Config {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    Config::from_lookup(|key| vars.get(key).cloned())
}

pub fn test_app(config: &Config) -> TestApp {
    let clock = Arc::new(test_clock());
    let notifier = Arc::new(RecordingNotifier::new());
    let state = AppState::new(
        config,
        Arc::new(InMemoryDocumentStore::<EventId, Event>::new()),
        notifier.clone(),
        clock.clone(),
    );
    TestApp { state, notifier, clock }
}

/// Create and publish an event owned by `org` with the given limit
pub async fn published_event(app: &TestApp, capacity: u32) -> EventId {
    use campus_core::environment::Clock;
    use campus_events::types::NewEvent;
    use campus_events::{Identity, Role};

    let organizer = Identity::new("org", Role::Organizer);
    let starts_at = app.clock.now() + chrono::Duration::days(7);
    let event = app
        .state
        .service
        .create_event(
            &organizer,
            NewEvent {
                title: "Robotics demo".to_string(),
                category: "tech".to_string(),
                starts_at,
                capacity,
                registration_limit: None,
                registration_deadline: None,
            },
        )
        .await
        .unwrap();
    app.state.service.publish_event(&organizer, event.id).await.unwrap();
    event.id
}
