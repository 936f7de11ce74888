//! The four metered generation endpoints. They share one pipeline:
//! authenticate, validate, gate on quota, generate, parse, shape to the
//! tier, charge the ledger once, persist, respond.

use crate::auth::authenticate;
use crate::error::{ApiError, Result};
use crate::projects::ProjectField;
use crate::{shaping, AppState};
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use mogulate_ai::{parse, prompts, Generator, Prompt, Provider};
use mogulate_common::{
    require_text, CompetitorRecord, FeatureRecord, MarketGapAnalysis, ValidationPlan,
};
use mogulate_usage::{CallKind, Tier, TierLimits};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default)]
    pub idea: Option<String>,
    #[serde(default)]
    pub competitors: Vec<CompetitorRecord>,
    #[serde(default)]
    pub positioning_suggestion: Option<String>,
    #[serde(default)]
    pub features: Vec<FeatureRecord>,
    #[serde(default, alias = "project_id")]
    pub project_id: Option<String>,
}

/// One instance of the generation pipeline.
pub trait GenerationEndpoint {
    /// Ledger endpoint name.
    const NAME: &'static str;
    /// Key the shaped result is returned under.
    const PAYLOAD_KEY: &'static str;
    const PROJECT_FIELD: ProjectField;

    type Input: Send + Sync;
    type Output: Serialize + Send;

    fn generator(state: &AppState) -> &Arc<dyn Generator>;
    fn validate(request: GenerationRequest) -> Result<Self::Input>;
    fn prompt(input: &Self::Input, limits: &TierLimits) -> Prompt;
    fn parse(content: &str) -> mogulate_ai::Result<Self::Output>;
    fn shape(output: Self::Output, limits: &TierLimits) -> Self::Output;
}

fn idea(request: &GenerationRequest) -> Result<String> {
    Ok(require_text("idea", request.idea.as_deref())?.to_string())
}

pub struct Competitors;

pub struct IdeaInput {
    idea: String,
}

impl GenerationEndpoint for Competitors {
    const NAME: &'static str = "competitors";
    const PAYLOAD_KEY: &'static str = "competitors";
    const PROJECT_FIELD: ProjectField = ProjectField::Competitors;

    type Input = IdeaInput;
    type Output = Vec<CompetitorRecord>;

    fn generator(state: &AppState) -> &Arc<dyn Generator> {
        &state.search
    }

    fn validate(request: GenerationRequest) -> Result<IdeaInput> {
        Ok(IdeaInput {
            idea: idea(&request)?,
        })
    }

    fn prompt(input: &IdeaInput, limits: &TierLimits) -> Prompt {
        prompts::competitors(&input.idea, limits.competitor_count)
    }

    fn parse(content: &str) -> mogulate_ai::Result<Self::Output> {
        parse::competitors(content)
    }

    fn shape(output: Self::Output, limits: &TierLimits) -> Self::Output {
        shaping::competitors(output, limits)
    }
}

pub struct MarketGaps;

pub struct MarketGapsInput {
    idea: String,
    competitors: Vec<CompetitorRecord>,
}

impl GenerationEndpoint for MarketGaps {
    const NAME: &'static str = "market-gaps";
    const PAYLOAD_KEY: &'static str = "analysis";
    const PROJECT_FIELD: ProjectField = ProjectField::MarketGapAnalysis;

    type Input = MarketGapsInput;
    type Output = MarketGapAnalysis;

    fn generator(state: &AppState) -> &Arc<dyn Generator> {
        &state.chat
    }

    fn validate(request: GenerationRequest) -> Result<MarketGapsInput> {
        let idea = idea(&request)?;
        if request.competitors.is_empty() {
            return Err(ApiError::BadRequest("competitors are required".to_string()));
        }
        Ok(MarketGapsInput {
            idea,
            competitors: request.competitors,
        })
    }

    fn prompt(input: &MarketGapsInput, limits: &TierLimits) -> Prompt {
        prompts::market_gaps(
            &input.idea,
            &input.competitors,
            limits.market_gap_count,
            limits.positioning_count,
        )
    }

    fn parse(content: &str) -> mogulate_ai::Result<Self::Output> {
        parse::market_gaps(content)
    }

    fn shape(output: Self::Output, limits: &TierLimits) -> Self::Output {
        shaping::market_gaps(output, limits)
    }
}

pub struct Features;

pub struct FeaturesInput {
    idea: String,
    positioning: String,
}

impl GenerationEndpoint for Features {
    const NAME: &'static str = "features";
    const PAYLOAD_KEY: &'static str = "features";
    const PROJECT_FIELD: ProjectField = ProjectField::Features;

    type Input = FeaturesInput;
    type Output = Vec<FeatureRecord>;

    fn generator(state: &AppState) -> &Arc<dyn Generator> {
        &state.chat
    }

    fn validate(request: GenerationRequest) -> Result<FeaturesInput> {
        let idea = idea(&request)?;
        let positioning =
            require_text("positioningSuggestion", request.positioning_suggestion.as_deref())?;
        Ok(FeaturesInput {
            idea,
            positioning: positioning.to_string(),
        })
    }

    fn prompt(input: &FeaturesInput, limits: &TierLimits) -> Prompt {
        prompts::features(&input.idea, &input.positioning, limits.feature_count)
    }

    fn parse(content: &str) -> mogulate_ai::Result<Self::Output> {
        parse::features(content)
    }

    fn shape(output: Self::Output, limits: &TierLimits) -> Self::Output {
        shaping::features(output, limits)
    }
}

pub struct ValidationPlanning;

pub struct ValidationInput {
    idea: String,
    features: Vec<FeatureRecord>,
}

impl GenerationEndpoint for ValidationPlanning {
    const NAME: &'static str = "validation-plan";
    const PAYLOAD_KEY: &'static str = "validationPlan";
    const PROJECT_FIELD: ProjectField = ProjectField::ValidationPlan;

    type Input = ValidationInput;
    type Output = ValidationPlan;

    fn generator(state: &AppState) -> &Arc<dyn Generator> {
        &state.chat
    }

    fn validate(request: GenerationRequest) -> Result<ValidationInput> {
        let idea = idea(&request)?;
        if request.features.is_empty() {
            return Err(ApiError::BadRequest("features are required".to_string()));
        }
        Ok(ValidationInput {
            idea,
            features: request.features,
        })
    }

    fn prompt(input: &ValidationInput, _limits: &TierLimits) -> Prompt {
        prompts::validation_plan(&input.idea, &input.features)
    }

    fn parse(content: &str) -> mogulate_ai::Result<Self::Output> {
        parse::validation_plan(content)
    }

    // A plan has no tier-dependent length.
    fn shape(output: Self::Output, _limits: &TierLimits) -> Self::Output {
        output
    }
}

fn call_kind(provider: Provider) -> CallKind {
    match provider {
        Provider::OpenAi => CallKind::OpenAi,
        Provider::Perplexity => CallKind::Perplexity,
    }
}

fn result_fields(key: &str, payload: Value, tier: Tier, remaining: u64) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(key.to_string(), payload);
    fields.insert("tier".to_string(), Value::String(tier.to_string()));
    fields.insert("remainingUsage".to_string(), Value::from(remaining));
    fields
}

fn decode(body: &[u8]) -> Result<GenerationRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(GenerationRequest::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
}

pub(crate) async fn run<E: GenerationEndpoint>(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Json<Value>> {
    let identity = authenticate(headers, state).await?;
    let request = decode(body)?;
    let project_id = request.project_id.clone().filter(|id| !id.trim().is_empty());
    let input = E::validate(request)?;

    let now = Utc::now();
    let decision = state.tracker.gate(&identity.id, now).await?;
    if !decision.allowed {
        info!(
            user_id = %identity.id,
            tier = %decision.tier,
            used = decision.used,
            "Quota exhausted, generation refused"
        );
    }
    let decision = decision.into_result()?;

    let generator = E::generator(state);
    let completion = generator
        .complete(&E::prompt(&input, &decision.limits))
        .await
        .map_err(|e| {
            warn!(endpoint = E::NAME, error = %e, "Generator call failed");
            ApiError::from(e)
        })?;

    let output = E::parse(&completion.content).map_err(|e| {
        warn!(
            endpoint = E::NAME,
            tokens = completion.tokens_used,
            error = %e,
            "Unusable generator output, not charged"
        );
        ApiError::from(e)
    })?;
    let shaped = E::shape(output, &decision.limits);
    let payload =
        serde_json::to_value(&shaped).map_err(|e| ApiError::Internal(e.to_string()))?;

    let remaining = decision.remaining_after_charge();
    let fields = result_fields(E::PAYLOAD_KEY, payload, decision.tier, remaining);

    if let Err(e) = state
        .tracker
        .record_call(
            &identity.id,
            call_kind(generator.provider()),
            completion.tokens_used,
            E::NAME,
            decision.charge_time(now),
        )
        .await
    {
        return Err(ApiError::PersistenceFailure {
            message: e.to_string(),
            data: fields,
        });
    }

    if let Some(project_id) = project_id {
        let value = fields.get(E::PAYLOAD_KEY).cloned().unwrap_or(Value::Null);
        if let Err(e) = state
            .projects
            .save(&identity.id, &project_id, E::PROJECT_FIELD, value, now)
            .await
        {
            return Err(ApiError::PersistenceFailure {
                message: e.to_string(),
                data: fields,
            });
        }
    }

    info!(
        user_id = %identity.id,
        endpoint = E::NAME,
        tokens = completion.tokens_used,
        remaining,
        "Generation completed"
    );

    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    body.extend(fields);
    Ok(Json(Value::Object(body)))
}

#[instrument(skip(state, headers, body))]
pub async fn competitors_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    run::<Competitors>(&state, &headers, &body).await
}

#[instrument(skip(state, headers, body))]
pub async fn market_gaps_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    run::<MarketGaps>(&state, &headers, &body).await
}

#[instrument(skip(state, headers, body))]
pub async fn features_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    run::<Features>(&state, &headers, &body).await
}

#[instrument(skip(state, headers, body))]
pub async fn validation_plan_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    run::<ValidationPlanning>(&state, &headers, &body).await
}
