use crate::{auth::Identity, models::DiagnosticsResponse, AppState};
use axum::{extract::{Extension, State}, http::StatusCode, Json};
use std::sync::{Arc, Mutex, OnceLock};
use sysinfo::System;
use tracing::info;

static SYSTEM_MONITOR: OnceLock<Mutex<System>> = OnceLock::new();

/// Registry and process statistics
pub async fn diagnostics(
    State(app_state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
) -> (StatusCode, Json<DiagnosticsResponse>) {
    let stats = app_state.registry.stats();
    let rooms = app_state.registry.room_summaries();

    // System stats
    let (cpu_usage, memory_alloc, memory_free, memory_total) = {
        let sys_lock = SYSTEM_MONITOR.get_or_init(|| {
            Mutex::new(System::new_all())
        });
        match sys_lock.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage(),
                    sys.used_memory(),
                    sys.free_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0, 0)
        }
    };

    info!(
        "Diagnostics for {}: CPU: {:.2}%, Mem: {}/{} MB (Free: {} MB), Rooms: {}, Sessions: {}",
        identity.user_id,
        cpu_usage,
        memory_alloc / 1024 / 1024,
        memory_total / 1024 / 1024,
        memory_free / 1024 / 1024,
        stats.rooms,
        stats.sessions
    );

    (
        StatusCode::OK,
        Json(DiagnosticsResponse {
            n_rooms: stats.rooms as u32,
            n_sessions: stats.sessions as u32,
            rooms,
            cpu_usage,
            memory_alloc,
            memory_total,
            memory_free,
        }),
    )
}
