use std::sync::Arc;

use axum::{
    extract::{Path, Query as QueryParams, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use super::catalog::NewOpportunity;
use super::domain::{
    Actor, ApplicationId, ApplicationStatus, CandidateId, OpportunityId, OrganizationId, Track,
};
use super::error::WorkflowError;
use super::notify::NotificationPublisher;
use super::onboarding::NewOrganization;
use super::platform::Platform;
use super::profiles::ProfileInput;
use super::store::EntityStore;

/// Header naming the caller's role: `candidate`, `staff` or `admin`.
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";
/// Candidate uid or organization id, depending on the role.
pub const ACTOR_ID_HEADER: &str = "x-actor-id";

type Shared<S, N> = State<Arc<Platform<S, N>>>;

/// Router exposing the engine operations over HTTP.
///
/// Authentication happens upstream; the gateway forwards the verified actor in the
/// `x-actor-role` / `x-actor-id` headers.
pub fn platform_router<S, N>(platform: Arc<Platform<S, N>>) -> Router
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    Router::new()
        .route(
            "/api/v1/opportunities",
            get(list_opportunities::<S, N>).post(publish_opportunity::<S, N>),
        )
        .route(
            "/api/v1/opportunities/:opportunity_id",
            get(opportunity_detail::<S, N>),
        )
        .route(
            "/api/v1/opportunities/:opportunity_id/close",
            post(close_opportunity::<S, N>),
        )
        .route(
            "/api/v1/opportunities/:opportunity_id/ranking",
            get(rank_applicants::<S, N>),
        )
        .route("/api/v1/applications", post(submit_application::<S, N>))
        .route(
            "/api/v1/applications/:application_id",
            get(application_detail::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/status",
            post(transition_status::<S, N>),
        )
        .route(
            "/api/v1/applications/:application_id/withdraw",
            post(withdraw_application::<S, N>),
        )
        .route(
            "/api/v1/candidates/:candidate_id/profile",
            put(save_profile::<S, N>).get(candidate_profile::<S, N>),
        )
        .route(
            "/api/v1/candidates/:candidate_id/applications",
            get(candidate_applications::<S, N>),
        )
        .route(
            "/api/v1/candidates/:candidate_id/matches/:opportunity_id",
            get(match_score::<S, N>),
        )
        .route("/api/v1/organizations", post(register_organization::<S, N>))
        .route(
            "/api/v1/organizations/pending",
            get(pending_organizations::<S, N>),
        )
        .route(
            "/api/v1/organizations/:organization_id/approve",
            post(approve_organization::<S, N>),
        )
        .route(
            "/api/v1/organizations/:organization_id/reject",
            post(reject_organization::<S, N>),
        )
        .route(
            "/api/v1/organizations/:organization_id/active",
            post(set_organization_active::<S, N>),
        )
        .route(
            "/api/v1/organizations/:organization_id/applications",
            get(organization_applications::<S, N>),
        )
        .route(
            "/api/v1/organizations/:organization_id/admissions",
            post(publish_admissions::<S, N>),
        )
        .with_state(platform)
}

impl WorkflowError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WorkflowError::NotFound { .. } => StatusCode::NOT_FOUND,
            WorkflowError::Ineligible(_)
            | WorkflowError::InvalidTransition { .. }
            | WorkflowError::InvalidInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            WorkflowError::Forbidden(_) => StatusCode::FORBIDDEN,
            WorkflowError::Conflict(_) => StatusCode::CONFLICT,
            WorkflowError::TransientStore(_) => StatusCode::SERVICE_UNAVAILABLE,
            WorkflowError::Notification(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for WorkflowError {
    fn into_response(self) -> Response {
        let payload = json!({
            "error": self.to_string(),
            "code": self.code(),
        });
        (self.status_code(), Json(payload)).into_response()
    }
}

/// Reads the gateway-provided actor headers.
pub fn actor_from_headers(headers: &HeaderMap) -> Result<Actor, WorkflowError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };
    let missing_id = || WorkflowError::Forbidden(format!("missing {ACTOR_ID_HEADER} header"));

    match header(ACTOR_ROLE_HEADER) {
        Some("admin") => Ok(Actor::Admin),
        Some("candidate") => header(ACTOR_ID_HEADER)
            .map(|id| Actor::Candidate(CandidateId::from(id)))
            .ok_or_else(missing_id),
        Some("staff") => header(ACTOR_ID_HEADER)
            .map(|id| Actor::Staff(OrganizationId::from(id)))
            .ok_or_else(missing_id),
        Some(other) => Err(WorkflowError::Forbidden(format!("unknown actor role {other}"))),
        None => Err(WorkflowError::Forbidden(format!(
            "missing {ACTOR_ROLE_HEADER} header"
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct ListingParams {
    #[serde(default)]
    track: Option<Track>,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    opportunity_id: OpportunityId,
}

#[derive(Debug, Deserialize)]
struct StatusRequest {
    status: String,
}

#[derive(Debug, Deserialize)]
struct ActiveRequest {
    active: bool,
}

#[derive(Debug, Deserialize)]
struct AdmissionsRequest {
    period: String,
}

async fn list_opportunities<S, N>(
    State(platform): Shared<S, N>,
    QueryParams(params): QueryParams<ListingParams>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let opportunities = platform.catalog.list_visible(params.track)?;
    Ok(Json(opportunities).into_response())
}

async fn opportunity_detail<S, N>(
    State(platform): Shared<S, N>,
    Path(opportunity_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let opportunity = platform
        .catalog
        .visible_by_id(&OpportunityId(opportunity_id))?;
    Ok(Json(opportunity).into_response())
}

async fn publish_opportunity<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Json(request): Json<NewOpportunity>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let opportunity = platform.catalog.publish_opportunity(&actor, request)?;
    Ok((StatusCode::CREATED, Json(opportunity)).into_response())
}

async fn close_opportunity<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(opportunity_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let opportunity = platform
        .catalog
        .close_opportunity(&OpportunityId(opportunity_id), &actor)?;
    Ok(Json(opportunity).into_response())
}

async fn rank_applicants<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(opportunity_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let ranked = platform
        .ranking
        .rank_applicants(&OpportunityId(opportunity_id), &actor)?;
    Ok(Json(ranked).into_response())
}

async fn submit_application<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let Actor::Candidate(candidate_id) = actor_from_headers(&headers)? else {
        return Err(WorkflowError::Forbidden(
            "only candidates submit applications".to_string(),
        ));
    };
    let application = platform
        .applications
        .submit_application(&candidate_id, &request.opportunity_id)?;
    Ok((StatusCode::CREATED, Json(application)).into_response())
}

async fn application_detail<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let application = platform
        .applications
        .application(&ApplicationId(application_id))?;
    let allowed = match &actor {
        Actor::Candidate(id) => id == &application.candidate_id,
        other => other.manages(&application.organization_id),
    };
    if !allowed {
        return Err(WorkflowError::Forbidden(format!(
            "{} cannot read {}",
            actor.describe(),
            application.id
        )));
    }
    Ok(Json(application).into_response())
}

async fn transition_status<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
    Json(request): Json<StatusRequest>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let application_id = ApplicationId(application_id);
    let current = platform.applications.application(&application_id)?;
    let target = ApplicationStatus::parse(current.track(), &request.status).ok_or_else(|| {
        WorkflowError::InvalidInput(format!(
            "{} is not a {} application status",
            request.status,
            current.track().label()
        ))
    })?;
    let application = platform
        .applications
        .transition_status(&application_id, target, &actor)?;
    Ok(Json(application).into_response())
}

async fn withdraw_application<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(application_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let Actor::Candidate(candidate_id) = actor_from_headers(&headers)? else {
        return Err(WorkflowError::Forbidden(
            "only the applicant can withdraw an application".to_string(),
        ));
    };
    let application = platform
        .applications
        .withdraw(&ApplicationId(application_id), &candidate_id)?;
    Ok(Json(application).into_response())
}

async fn save_profile<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(candidate_id): Path<String>,
    Json(input): Json<ProfileInput>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let candidate = platform
        .candidates
        .save_profile(&CandidateId(candidate_id), input, &actor)?;
    Ok(Json(candidate).into_response())
}

async fn candidate_profile<S, N>(
    State(platform): Shared<S, N>,
    Path(candidate_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let candidate = platform.candidates.profile(&CandidateId(candidate_id))?;
    Ok(Json(candidate).into_response())
}

async fn candidate_applications<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(candidate_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let candidate_id = CandidateId(candidate_id);
    match actor_from_headers(&headers)? {
        Actor::Admin => {}
        Actor::Candidate(id) if id == candidate_id => {}
        other => {
            return Err(WorkflowError::Forbidden(format!(
                "{} cannot list applications of {candidate_id}",
                other.describe()
            )));
        }
    }
    let applications = platform
        .applications
        .applications_for_candidate(&candidate_id)?;
    Ok(Json(applications).into_response())
}

async fn match_score<S, N>(
    State(platform): Shared<S, N>,
    Path((candidate_id, opportunity_id)): Path<(String, String)>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let score =
        platform.score_match(&CandidateId(candidate_id), &OpportunityId(opportunity_id))?;
    Ok(Json(score).into_response())
}

async fn register_organization<S, N>(
    State(platform): Shared<S, N>,
    Json(request): Json<NewOrganization>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let organization = platform.organizations.register(request)?;
    Ok((StatusCode::CREATED, Json(organization)).into_response())
}

async fn pending_organizations<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    if actor_from_headers(&headers)? != Actor::Admin {
        return Err(WorkflowError::Forbidden(
            "only admins review registrations".to_string(),
        ));
    }
    Ok(Json(platform.organizations.pending()?).into_response())
}

async fn approve_organization<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let organization = platform
        .organizations
        .approve(&OrganizationId(organization_id), &actor)?;
    Ok(Json(organization).into_response())
}

async fn reject_organization<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let organization = platform
        .organizations
        .reject(&OrganizationId(organization_id), &actor)?;
    Ok(Json(organization).into_response())
}

async fn set_organization_active<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
    Json(request): Json<ActiveRequest>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let organization = platform.organizations.set_active(
        &OrganizationId(organization_id),
        request.active,
        &actor,
    )?;
    Ok(Json(organization).into_response())
}

async fn organization_applications<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let organization_id = OrganizationId(organization_id);
    if !actor.manages(&organization_id) {
        return Err(WorkflowError::Forbidden(format!(
            "{} cannot list applications of {organization_id}",
            actor.describe()
        )));
    }
    let applications = platform
        .applications
        .applications_for_organization(&organization_id)?;
    Ok(Json(applications).into_response())
}

async fn publish_admissions<S, N>(
    State(platform): Shared<S, N>,
    headers: HeaderMap,
    Path(organization_id): Path<String>,
    Json(request): Json<AdmissionsRequest>,
) -> Result<Response, WorkflowError>
where
    S: EntityStore + 'static,
    N: NotificationPublisher + 'static,
{
    let actor = actor_from_headers(&headers)?;
    let publication = platform.applications.publish_admissions(
        &OrganizationId(organization_id),
        &request.period,
        &actor,
    )?;
    Ok((StatusCode::CREATED, Json(publication)).into_response())
}
