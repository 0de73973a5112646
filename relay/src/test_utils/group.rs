use crate::config::GroupConfig;
use crate::dispatcher::Dispatcher;
use crate::group::DispatcherGroup;

/// Creates a dispatcher group with test-friendly defaults.
pub fn create_group<D>(id: u64, worker_count: u16, dispatcher: D) -> DispatcherGroup<D>
where
    D: Dispatcher + Clone + Send + Sync + 'static,
{
    let config = GroupConfig::new(id, worker_count);

    DispatcherGroup::new(config, dispatcher).expect("test group configuration is valid")
}
