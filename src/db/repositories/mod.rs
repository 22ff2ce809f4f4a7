mod app_state;
mod sessions;
mod sync_metrics;
