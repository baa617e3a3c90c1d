// Familiar Market - API Server
// REST surface over the marketplace: entity CRUD, contract formation, review

use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, put},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Mutex};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info};

use familiar_market::entities::{customer, familiar, group, wizard};
use familiar_market::{
    contracts, db_path_from_env, form_contract, open_database, review, roster, CoinFlip,
    CustomerPatch, FamiliarPatch, GroupPatch, MarketError, MatchOutcome, NewCustomer, NewFamiliar,
    NewGroup, NewWizard, ReviewDecision, WizardPatch,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<rusqlite::Connection>>,
}

// ============================================================================
// Error mapping
// ============================================================================

/// Wraps `MarketError` so handlers can use `?` and still produce the
/// `{ "error": ... }` JSON shape with the right status code.
struct ApiError(MarketError);

impl From<MarketError> for ApiError {
    fn from(err: MarketError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Contract handlers
// ============================================================================

#[derive(Deserialize)]
struct CreateContractRequest {
    #[serde(rename = "customerId")]
    customer_id: Option<i64>,
}

#[derive(Deserialize)]
struct ReviewRequest {
    action: Option<String>,
}

/// POST /api/contracts - run the matching engine for a customer
async fn create_contract(
    State(state): State<AppState>,
    Json(body): Json<CreateContractRequest>,
) -> ApiResult<Response> {
    let customer_id = body
        .customer_id
        .ok_or(MarketError::MissingField("customerId"))?;

    let mut conn = state.db.lock().unwrap();
    let mut oracle = CoinFlip::new();
    let outcome = form_contract(&mut conn, customer_id, &mut oracle)?;

    Ok(match outcome {
        MatchOutcome::Formed {
            contract,
            familiar_name,
        } => {
            info!(
                "contract {} formed: customer {} with familiar {}",
                contract.id, contract.customer_id, familiar_name
            );
            (
                StatusCode::CREATED,
                Json(json!({
                    "message": format!(
                        "Contract formed successfully with familiar: {}",
                        familiar_name
                    ),
                    "contract": contract,
                })),
            )
                .into_response()
        }
        MatchOutcome::NoAcceptance => (
            StatusCode::OK,
            Json(json!({
                "message": "No familiars accepted the contract. No contract formed.",
                "contract": null,
            })),
        )
            .into_response(),
    })
}

/// GET /api/contracts - all contracts with joined customer/familiar
async fn list_contracts(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let details = contracts::find_all_with_details(&conn)?;
    Ok(Json(details).into_response())
}

/// GET /api/contracts/:id
async fn get_contract(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let details = contracts::find_with_details(&conn, id)?;
    Ok(Json(details).into_response())
}

/// DELETE /api/contracts/:id
async fn delete_contract(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    contracts::delete(&conn, id)?;
    Ok(Json(json!({ "message": "Contract deleted successfully" })).into_response())
}

/// PUT /api/wizards/:wizard_id/contract/:contract_id - review workflow
async fn review_contract(
    State(state): State<AppState>,
    Path((wizard_id, contract_id)): Path<(i64, i64)>,
    Json(body): Json<ReviewRequest>,
) -> ApiResult<Response> {
    let action = body.action.ok_or(MarketError::MissingField("action"))?;
    let decision = ReviewDecision::parse(&action)?;

    let mut conn = state.db.lock().unwrap();
    let contract = review(&mut conn, wizard_id, contract_id, decision)?;

    info!(
        "contract {} {} by wizard {}",
        contract_id, action, wizard_id
    );
    Ok(Json(json!({
        "message": format!("Contract {}", action),
        "contract": contract,
    }))
    .into_response())
}

// ============================================================================
// Wizard handlers
// ============================================================================

async fn create_wizard(
    State(state): State<AppState>,
    Json(body): Json<NewWizard>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let wiz = wizard::create(&conn, &body)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Wizard created", "wizard": wiz })),
    )
        .into_response())
}

async fn list_wizards(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let wizards = wizard::list(&conn)?;
    Ok(Json(json!({ "wizards": wizards })).into_response())
}

async fn get_wizard(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let wiz = wizard::get(&conn, id)?;
    Ok(Json(json!({ "wizard": wiz })).into_response())
}

async fn update_wizard(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<WizardPatch>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let wiz = wizard::update(&conn, id, &patch)?;
    Ok(Json(json!({ "message": "Wizard updated", "wizard": wiz })).into_response())
}

async fn delete_wizard(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let mut conn = state.db.lock().unwrap();
    wizard::delete(&mut conn, id)?;
    Ok(Json(json!({ "message": "Wizard deleted" })).into_response())
}

/// GET /api/wizards/:id/groups
async fn wizard_groups(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    wizard::get(&conn, id)?;
    let groups = group::find_by_wizard(&conn, id)?;
    Ok(Json(json!({ "groups": groups })).into_response())
}

/// GET /api/wizards/:id/contracts - contracts whose familiar sits in one of
/// the wizard's groups
async fn wizard_contracts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    wizard::get(&conn, id)?;

    let group_ids: Vec<i64> = group::find_by_wizard(&conn, id)?
        .into_iter()
        .map(|g| g.id)
        .collect();

    let owned: Vec<_> = contracts::find_all_with_details(&conn)?
        .into_iter()
        .filter(|d| {
            d.familiar
                .group_id
                .map(|gid| group_ids.contains(&gid))
                .unwrap_or(false)
        })
        .collect();

    Ok(Json(json!({ "contracts": owned })).into_response())
}

// ============================================================================
// Group handlers
// ============================================================================

async fn create_group(
    State(state): State<AppState>,
    Json(body): Json<NewGroup>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let grp = group::create(&conn, &body)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Group created", "group": grp })),
    )
        .into_response())
}

async fn list_groups(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let groups = group::list(&conn)?;
    Ok(Json(json!({ "groups": groups })).into_response())
}

async fn get_group(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let grp = group::get(&conn, id)?;
    Ok(Json(json!({ "group": grp })).into_response())
}

async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<GroupPatch>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let grp = group::update(&conn, id, &patch)?;
    Ok(Json(json!({ "message": "Group updated", "group": grp })).into_response())
}

async fn delete_group(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let mut conn = state.db.lock().unwrap();
    group::delete(&mut conn, id)?;
    Ok(Json(json!({ "message": "Group deleted" })).into_response())
}

/// GET /api/groups/:id/familiars - the roster, in resolver order
async fn group_familiars(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let familiars = roster::familiars_of(&conn, id)?;
    Ok(Json(json!({ "familiars": familiars })).into_response())
}

/// GET /api/groups/:id/customers
async fn group_customers(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    group::get(&conn, id)?;
    let customers = customer::find_by_group(&conn, id)?;
    Ok(Json(json!({ "customers": customers })).into_response())
}

// ============================================================================
// Customer handlers
// ============================================================================

async fn create_customer(
    State(state): State<AppState>,
    Json(body): Json<NewCustomer>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let cust = customer::create(&conn, &body)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Customer created", "customer": cust })),
    )
        .into_response())
}

async fn list_customers(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let customers = customer::list(&conn)?;
    Ok(Json(json!({ "customers": customers })).into_response())
}

async fn get_customer(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let cust = customer::get(&conn, id)?;
    Ok(Json(json!({ "customer": cust })).into_response())
}

async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<CustomerPatch>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let cust = customer::update(&conn, id, &patch)?;
    Ok(Json(json!({ "message": "Customer updated", "customer": cust })).into_response())
}

async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let mut conn = state.db.lock().unwrap();
    customer::delete(&mut conn, id)?;
    Ok(Json(json!({ "message": "Customer deleted" })).into_response())
}

/// GET /api/customers/:id/contracts
async fn customer_contracts(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    customer::get(&conn, id)?;
    let contracts = contracts::find_by_customer(&conn, id)?;
    Ok(Json(json!({ "contracts": contracts })).into_response())
}

// ============================================================================
// Familiar handlers
// ============================================================================

async fn create_familiar(
    State(state): State<AppState>,
    Json(body): Json<NewFamiliar>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let fam = familiar::create(&conn, &body)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Familiar created", "familiar": fam })),
    )
        .into_response())
}

async fn list_familiars(State(state): State<AppState>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let familiars = familiar::list(&conn)?;
    Ok(Json(json!({ "familiars": familiars })).into_response())
}

async fn get_familiar(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let fam = familiar::get(&conn, id)?;
    Ok(Json(json!({ "familiar": fam })).into_response())
}

async fn update_familiar(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<FamiliarPatch>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let fam = familiar::update(&conn, id, &patch)?;
    Ok(Json(json!({ "message": "Familiar updated", "familiar": fam })).into_response())
}

async fn delete_familiar(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Response> {
    let mut conn = state.db.lock().unwrap();
    familiar::delete(&mut conn, id)?;
    Ok(Json(json!({ "message": "Familiar deleted" })).into_response())
}

/// GET /api/familiars/group/:group_id
async fn familiars_by_group(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> ApiResult<Response> {
    let conn = state.db.lock().unwrap();
    let familiars = roster::familiars_of(&conn, group_id)?;
    Ok(Json(json!({ "familiars": familiars })).into_response())
}

// ============================================================================
// Health
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "OK" }))
}

// ============================================================================
// Router & main
// ============================================================================

fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/contracts", get(list_contracts).post(create_contract))
        .route(
            "/contracts/:id",
            get(get_contract).delete(delete_contract),
        )
        .route("/wizards", get(list_wizards).post(create_wizard))
        .route(
            "/wizards/:id",
            get(get_wizard).put(update_wizard).delete(delete_wizard),
        )
        .route("/wizards/:id/groups", get(wizard_groups))
        .route("/wizards/:id/contracts", get(wizard_contracts))
        .route("/wizards/:id/contract/:contract_id", put(review_contract))
        .route("/groups", get(list_groups).post(create_group))
        .route(
            "/groups/:id",
            get(get_group).put(update_group).delete(delete_group),
        )
        .route("/groups/:id/familiars", get(group_familiars))
        .route("/groups/:id/customers", get(group_customers))
        .route("/customers", get(list_customers).post(create_customer))
        .route(
            "/customers/:id",
            get(get_customer)
                .put(update_customer)
                .delete(delete_customer),
        )
        .route("/customers/:id/contracts", get(customer_contracts))
        .route("/familiars", get(list_familiars).post(create_familiar))
        .route("/familiars/group/:group_id", get(familiars_by_group))
        .route(
            "/familiars/:id",
            get(get_familiar)
                .put(update_familiar)
                .delete(delete_familiar),
        )
        .with_state(state)
}

/// CORS from `CORS_ORIGIN` (comma-separated allow-list); permissive when
/// unset, which is what local admin-console development wants.
fn cors_layer() -> CorsLayer {
    match std::env::var("CORS_ORIGIN") {
        Ok(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        Err(_) => CorsLayer::permissive(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "market_server=info,familiar_market=info".into()),
        )
        .init();

    let db_path = db_path_from_env();
    let conn = open_database(&db_path)?;
    info!("database opened: {}", db_path);

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    let app = Router::new()
        .nest("/api", api_router(state))
        .layer(cors_layer());

    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3000);
    let addr = format!("0.0.0.0:{}", port);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("market server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
