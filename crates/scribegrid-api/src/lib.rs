//! scribegrid-api — REST API for ScribeGrid.
//!
//! axum route handlers for users, servers, jobs, and payments. Plain
//! document CRUD goes straight to the `StateStore`; anything that touches
//! job placement goes through the `JobOrchestrator`.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthcheck` | Store liveness |
//! | GET/POST | `/api/v1/users` | List (filtered, paged) / create users |
//! | GET/PUT/PATCH/DELETE | `/api/v1/users/{id}` | Read / replace / patch / delete a user |
//! | GET/POST | `/api/v1/users/{id}/jobs` | List a user's jobs / submit a job |
//! | DELETE | `/api/v1/users/{id}/jobs/{job_id}` | Delete a job |
//! | POST | `/api/v1/users/{id}/jobs/{job_id}/link` | Retry linking a job to its owner |
//! | POST | `/api/v1/users/{id}/payments` | Add a payment |
//! | DELETE | `/api/v1/users/{id}/payments/{payment_id}` | Remove a payment |
//! | GET/POST | `/api/v1/servers` | List (filtered) / register servers |
//! | GET/PUT/PATCH/DELETE | `/api/v1/servers/{id}` | Read / replace / patch / delete a server |
//! | GET | `/api/v1/servers/{id}/current_jobs` | Jobs in flight on a server |
//! | GET | `/api/v1/servers/{id}/completed_jobs` | Jobs a server finished |
//! | POST | `/api/v1/servers/{id}/jobs/{job_id}` | Attach a job to a server |
//! | GET/PATCH | `/api/v1/jobs/{id}` | Read / patch a job |
//! | GET | `/api/v1/dump/export` | Export every document |
//! | POST | `/api/v1/dump/import` | Replace every document |
//! | POST | `/api/v1/maintenance/sweep` | Run a status sweep |
//! | POST | `/api/v1/maintenance/reconcile` | Run a reconciliation pass |

pub mod handlers;
pub mod job_handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use scribegrid_scheduler::{JobOrchestrator, Reconciler, SchedulerConfig, Stores, SweeperConfig};
use scribegrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub orchestrator: Arc<JobOrchestrator>,
    pub reconciler: Arc<Reconciler>,
}

impl ApiState {
    /// Wire the scheduler components over `store`.
    pub fn new(store: StateStore, scheduler: SchedulerConfig, sweeper: SweeperConfig) -> Self {
        let stores = Stores::from_state(store.clone()).with_timeout(scheduler.store_timeout());
        let reconciler = Reconciler::new(stores.clone()).with_skeleton_ttl(scheduler.job_duration());
        let orchestrator = JobOrchestrator::new(stores, scheduler, sweeper);
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            reconciler: Arc::new(reconciler),
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        .route(
            "/users/{id}",
            get(handlers::get_user)
                .put(handlers::replace_user)
                .patch(handlers::patch_user)
                .delete(handlers::delete_user),
        )
        .route(
            "/users/{id}/jobs",
            get(job_handlers::list_user_jobs).post(job_handlers::submit_job),
        )
        .route("/users/{id}/jobs/{job_id}", delete(job_handlers::delete_user_job))
        .route("/users/{id}/jobs/{job_id}/link", post(job_handlers::link_user_job))
        .route("/users/{id}/payments", post(handlers::add_payment))
        .route(
            "/users/{id}/payments/{payment_id}",
            delete(handlers::delete_payment),
        )
        .route("/servers", get(handlers::list_servers).post(handlers::create_server))
        .route(
            "/servers/{id}",
            get(handlers::get_server)
                .put(handlers::replace_server)
                .patch(handlers::patch_server)
                .delete(handlers::delete_server),
        )
        .route("/servers/{id}/current_jobs", get(handlers::server_current_jobs))
        .route("/servers/{id}/completed_jobs", get(handlers::server_completed_jobs))
        .route("/servers/{id}/jobs/{job_id}", post(job_handlers::attach_job))
        .route(
            "/jobs/{id}",
            get(job_handlers::get_job).patch(job_handlers::patch_job),
        )
        .route("/dump/export", get(handlers::export_dump))
        .route("/dump/import", post(handlers::import_dump))
        .route("/maintenance/sweep", post(job_handlers::run_sweep))
        .route("/maintenance/reconcile", post(job_handlers::run_reconcile))
        .with_state(state.clone());

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthcheck", get(handlers::healthcheck).with_state(state))
}
