use crate::config::Config;
use crate::errors::AppError;
use crate::intake;
use crate::ledger::LedgerService;
use crate::loans::LoanService;
use crate::models::*;
use crate::portfolio::{ArrearsEntry, PortfolioService, PortfolioSummary};
use crate::scoring::RiskScorer;
use crate::scoring_client::CALCULATE_RISK_SCORE_PATH;
use crate::store::RecordStore;
use axum::{
    extract::{FromRequest, FromRequestParts, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Shared application state injected into handlers.
pub struct AppState {
    /// Record store backing every service.
    pub store: Arc<dyn RecordStore>,
    /// Application configuration.
    pub config: Config,
    pub ledger: LedgerService,
    pub scorer: RiskScorer,
    pub loans: LoanService,
    pub portfolio: PortfolioService,
}

impl AppState {
    /// Wires the services around a single record store.
    pub fn new(store: Arc<dyn RecordStore>, config: Config) -> Self {
        let scorer = RiskScorer::new(store.clone());
        Self {
            ledger: LedgerService::new(store.clone(), config.ledger_max_attempts),
            loans: LoanService::new(store.clone(), scorer.clone()),
            portfolio: PortfolioService::new(store.clone()),
            scorer,
            store,
            config,
        }
    }
}

/// JSON body extractor whose rejection is an [`AppError`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Path extractor whose rejection is an [`AppError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

/// Query extractor whose rejection is an [`AppError`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Every API route except `/health` and the documentation.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        // Risk scoring boundary
        .route(CALCULATE_RISK_SCORE_PATH, post(calculate_risk_score))
        .route("/api/v1/risk-scores", post(calculate_risk_score))
        .route(
            "/api/v1/clients/:id/risk-scores",
            get(list_client_risk_scores),
        )
        // Clients
        .route("/api/v1/clients", post(register_client))
        .route("/api/v1/clients/:id", get(get_client))
        // Loans and ledger
        .route("/api/v1/loans", post(disburse_loan).get(list_loans))
        .route("/api/v1/loans/:id", get(get_loan))
        .route(
            "/api/v1/loans/:id/repayments",
            post(record_repayment).get(list_repayments),
        )
        .route(
            "/api/v1/loans/:id/guarantors",
            post(add_guarantor).get(list_guarantors),
        )
        .route("/api/v1/loans/:id/risk-score", get(get_loan_risk_score))
        // Portfolio
        .route("/api/v1/portfolio/summary", get(portfolio_summary))
        .route("/api/v1/portfolio/arrears", get(arrears_watchlist))
}

/// Health check endpoint.
///
/// Returns the service status, version, and the configured store backend.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "sacco-risk-api",
            "version": env!("CARGO_PKG_VERSION"),
            "store": format!("{:?}", state.config.store_backend).to_lowercase(),
        })),
    )
}

/// POST /functions/v1/calculate-risk-score (also POST /api/v1/risk-scores)
///
/// Scores a client, optionally against one of their loans, and stores the
/// result. The request and response bodies use camelCase keys.
pub async fn calculate_risk_score(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RiskScoreRequest>,
) -> Result<Json<RiskScoreResult>, AppError> {
    tracing::info!(
        "POST calculate-risk-score - client: {}, loan: {:?}",
        req.client_id,
        req.loan_id
    );

    let stored = state.scorer.score(req.client_id, req.loan_id).await?;
    Ok(Json(RiskScoreResult::from(&stored)))
}

/// GET /api/v1/clients/:id/risk-scores
pub async fn list_client_risk_scores(
    State(state): State<Arc<AppState>>,
    ApiPath(client_id): ApiPath<Uuid>,
) -> Result<Json<Vec<RiskScore>>, AppError> {
    Ok(Json(state.scorer.history(client_id).await?))
}

/// POST /api/v1/clients
pub async fn register_client(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterClientRequest>,
) -> Result<(StatusCode, Json<Client>), AppError> {
    tracing::info!("POST /clients - member_number: {}", req.member_number);

    let client = intake::register_client(state.store.as_ref(), req).await?;
    Ok((StatusCode::CREATED, Json(client)))
}

/// GET /api/v1/clients/:id
pub async fn get_client(
    State(state): State<Arc<AppState>>,
    ApiPath(client_id): ApiPath<Uuid>,
) -> Result<Json<Client>, AppError> {
    Ok(Json(state.loans.get_client(client_id).await?))
}

/// POST /api/v1/loans
///
/// Disburses a loan and returns it with its initial risk score.
pub async fn disburse_loan(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<DisburseLoanRequest>,
) -> Result<(StatusCode, Json<DisbursedLoan>), AppError> {
    tracing::info!(
        "POST /loans - client: {}, principal: {}",
        req.client_id,
        req.principal_amount
    );

    let disbursed = state.loans.disburse(req).await?;
    Ok((StatusCode::CREATED, Json(disbursed)))
}

/// GET /api/v1/loans?status=&client_id=
pub async fn list_loans(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<LoanQueryParams>,
) -> Result<Json<Vec<Loan>>, AppError> {
    Ok(Json(state.loans.list_loans(&params).await?))
}

/// GET /api/v1/loans/:id
pub async fn get_loan(
    State(state): State<Arc<AppState>>,
    ApiPath(loan_id): ApiPath<Uuid>,
) -> Result<Json<Loan>, AppError> {
    Ok(Json(state.loans.get_loan(loan_id).await?))
}

/// POST /api/v1/loans/:id/repayments
///
/// Records a payment and returns the updated loan with the new ledger entry.
pub async fn record_repayment(
    State(state): State<Arc<AppState>>,
    ApiPath(loan_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentReceipt>), AppError> {
    tracing::info!("POST /loans/{}/repayments - amount: {}", loan_id, req.amount);

    let receipt = state.ledger.record_payment(loan_id, req).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/v1/loans/:id/repayments?limit=
pub async fn list_repayments(
    State(state): State<Arc<AppState>>,
    ApiPath(loan_id): ApiPath<Uuid>,
    ApiQuery(params): ApiQuery<RepaymentQueryParams>,
) -> Result<Json<Vec<Repayment>>, AppError> {
    Ok(Json(
        state.loans.list_repayments(loan_id, params.limit).await?,
    ))
}

/// POST /api/v1/loans/:id/guarantors
pub async fn add_guarantor(
    State(state): State<Arc<AppState>>,
    ApiPath(loan_id): ApiPath<Uuid>,
    ApiJson(req): ApiJson<AddGuarantorRequest>,
) -> Result<(StatusCode, Json<Guarantor>), AppError> {
    let guarantor = state.loans.add_guarantor(loan_id, req).await?;
    Ok((StatusCode::CREATED, Json(guarantor)))
}

/// GET /api/v1/loans/:id/guarantors
pub async fn list_guarantors(
    State(state): State<Arc<AppState>>,
    ApiPath(loan_id): ApiPath<Uuid>,
) -> Result<Json<Vec<Guarantor>>, AppError> {
    Ok(Json(state.loans.list_guarantors(loan_id).await?))
}

/// GET /api/v1/loans/:id/risk-score
///
/// The most recently stored score for the loan. Does not rescore.
pub async fn get_loan_risk_score(
    State(state): State<Arc<AppState>>,
    ApiPath(loan_id): ApiPath<Uuid>,
) -> Result<Json<RiskScore>, AppError> {
    Ok(Json(state.scorer.current_score(loan_id).await?))
}

/// GET /api/v1/portfolio/summary
pub async fn portfolio_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<PortfolioSummary>, AppError> {
    Ok(Json(state.portfolio.summary().await?))
}

/// GET /api/v1/portfolio/arrears
pub async fn arrears_watchlist(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ArrearsEntry>>, AppError> {
    Ok(Json(state.portfolio.arrears_watchlist().await?))
}
