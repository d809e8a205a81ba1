use std::rc::Rc;
use std::time::Duration;

use globe_client::config::{self, MapConfig};
use globe_client::demo::{DemoStore, StaticFeed};
use globe_client::feed::ChangeFeed;
use globe_client::headless::HeadlessEngine;
use globe_client::http_store::HttpStore;
use globe_client::sse::SseFeed;
use globe_client::store::LocationStore;
use globe_client::viewport::ViewportEvent;
use globe_client::LiveMapView;
use tokio::signal;
use tokio::time::{Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const DEMO_SEED: u64 = 0x0910_be5e;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "failed to build runtime");
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&runtime, async {
        let config = MapConfig::from_env();
        match config::api_base() {
            Some(base) => {
                let store = match HttpStore::new(&base) {
                    Ok(store) => store,
                    Err(e) => {
                        tracing::error!(error = %e, %base, "invalid GLOBE_API_BASE");
                        return;
                    }
                };
                let feed = match SseFeed::for_base(&base) {
                    Ok(feed) => feed,
                    Err(e) => {
                        tracing::error!(error = %e, %base, "invalid GLOBE_API_BASE");
                        return;
                    }
                };
                tracing::info!(%base, "syncing with data store");
                run(&config, Rc::new(store), &feed).await;
            }
            None => {
                let store = DemoStore::generate(config::demo_location_count(), DEMO_SEED);
                tracing::info!(
                    locations = store.len(),
                    "GLOBE_API_BASE unset, running offline demo"
                );
                run(&config, Rc::new(store), &StaticFeed).await;
            }
        }
    });
}

async fn run<S, F>(config: &MapConfig, store: Rc<S>, feed: &F)
where
    S: LocationStore + 'static,
    F: ChangeFeed,
{
    let view = match LiveMapView::<HeadlessEngine, S>::mount(config, store, feed, |profile| {
        tracing::info!(
            profile_id = %profile.id,
            number = %profile.profile_number,
            "profile selected"
        );
    }) {
        Ok(view) => view,
        Err(e) => {
            tracing::error!(error = %e, "cannot show the globe");
            return;
        }
    };
    view.handle_event(ViewportEvent::StyleLoaded);
    if let Some(number) = config::initial_profile() {
        view.select_profile_by_number(&number).await;
    }

    let mut frames = tokio::time::interval(FRAME_INTERVAL);
    frames.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    let mut last_frame = Instant::now();

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "failed to install Ctrl+C handler");
                }
                break;
            }
            _ = frames.tick() => {
                let now = Instant::now();
                let dt_ms = now.duration_since(last_frame).as_secs_f64() * 1000.0;
                last_frame = now;
                for event in view.with_engine_mut(|engine| engine.advance(dt_ms)) {
                    view.handle_event(event);
                }
            }
            _ = status.tick() => {
                let camera = view.camera();
                let stats = view.stats();
                tracing::info!(
                    lng = camera.center.lng,
                    zoom = camera.zoom,
                    markers = view.live_marker_ids().len(),
                    feed = ?view.feed_status(),
                    reloads = stats.reloads_applied,
                    failed = stats.reloads_failed,
                    "globe status"
                );
                for notice in view.notices() {
                    tracing::warn!(level = ?notice.level, "{}", notice.message);
                }
            }
        }
    }

    view.teardown();
    tracing::info!("globe demo stopped");
}
