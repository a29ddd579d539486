use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::EternalConfig;
use crate::_typed_codec::{Codec, Json};
use crate::correlation::{CorrelationContext, TelemetrySink, track_best_effort};
use crate::error::OrchestrationError;
use crate::runtime::OrchestrationRegistryBuilder;
use crate::{OrchestrationContext, durable_debug, durable_error, durable_info, durable_warn};

/// Registered name of the eternal coordinator.
pub const COORDINATOR: &str = "Orchestrator";
/// Registered name of the per-cycle sub-orchestration.
pub const CYCLE: &str = "SubOrchestrator";

/// Input shared by the coordinator and each cycle. The coordinator forwards
/// it unchanged to the child and into the next execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EternalInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<CorrelationContext>,
}

impl EternalInput {
    /// Input carrying a freshly started root trace.
    pub fn with_new_root() -> Self {
        Self {
            correlation: Some(CorrelationContext::new_root()),
        }
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| e.to_string())
    }
}

/// Result of one coordinator execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome")]
pub enum CoordinatorOutcome {
    /// Running under an identity other than the configured owner; nothing done.
    Superseded { instance: String, owner: String },
    /// The cycle finished and the coordinator rolled over into a new execution.
    ContinuedAsNew { child: String, result: String },
}

/// Result of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleOutcome {
    pub operation_id: String,
    pub fired_at_ms: u64,
}

/// Extract and validate the correlation context carried by `input`.
pub fn parse_correlation(input: &str) -> Result<CorrelationContext, OrchestrationError> {
    if input.trim().is_empty() {
        return Err(OrchestrationError::MissingCorrelationContext);
    }
    let value: Value = serde_json::from_str(input).map_err(|e| OrchestrationError::MalformedCorrelationContext {
        reason: format!("input is not JSON: {e}"),
    })?;
    let Value::Object(mut fields) = value else {
        return Err(OrchestrationError::MalformedCorrelationContext {
            reason: "input is not a JSON object".into(),
        });
    };
    let raw = match fields.remove("correlation") {
        None | Some(Value::Null) => return Err(OrchestrationError::MissingCorrelationContext),
        Some(v) => v,
    };
    let correlation: CorrelationContext =
        serde_json::from_value(raw).map_err(|e| OrchestrationError::MalformedCorrelationContext { reason: e.to_string() })?;
    correlation.validate()?;
    Ok(correlation)
}

/// Eternal coordinator: run one cycle as a child, then continue as new with
/// the same input. Does nothing when hosted under a foreign identity.
pub async fn coordinator(
    ctx: OrchestrationContext,
    input: String,
    owner: &str,
) -> Result<CoordinatorOutcome, OrchestrationError> {
    let instance = ctx.instance_id();
    if instance != owner {
        durable_debug!(ctx, owner, "instance is not the configured owner; skipping");
        return Ok(CoordinatorOutcome::Superseded {
            instance,
            owner: owner.to_string(),
        });
    }

    let proposed = format!("Sub_{}", ctx.new_guid());
    let fut = ctx.schedule_sub_orchestration(CYCLE, proposed, input.clone());
    // On replay the recorded child id wins
    let child = fut.child_instance().unwrap_or_default().to_string();
    durable_info!(ctx, child = %child, "started cycle");

    match fut.into_sub_orchestration().await {
        Ok(result) => {
            ctx.continue_as_new(input);
            Ok(CoordinatorOutcome::ContinuedAsNew { child, result })
        }
        Err(error) => {
            durable_warn!(ctx, child = %child, error = %error, "cycle failed");
            Err(OrchestrationError::SubOrchestrationFailed { instance: child, error })
        }
    }
}

/// One cycle: report the caller's trace once, then wait `delay_ms`.
pub async fn cycle(
    ctx: OrchestrationContext,
    input: String,
    telemetry: Arc<dyn TelemetrySink>,
    delay_ms: u64,
) -> Result<CycleOutcome, OrchestrationError> {
    let correlation = match parse_correlation(&input) {
        Ok(c) => c,
        Err(e) => {
            durable_error!(ctx, error = %e, "rejecting cycle input");
            return Err(e);
        }
    };
    if !ctx.is_replaying() {
        track_best_effort(telemetry.as_ref(), correlation.trace_record());
    }
    durable_info!(ctx, operation_id = %correlation.operation_id, delay_ms, "cycle waiting");
    ctx.schedule_timer(delay_ms).into_timer().await;
    Ok(CycleOutcome {
        operation_id: correlation.operation_id,
        fired_at_ms: ctx.current_time_ms(),
    })
}

/// Serialize an orchestration result for history.
pub(crate) fn encode_output<T: Serialize>(out: &T) -> Result<String, OrchestrationError> {
    Json::encode(out).map_err(OrchestrationError::Codec)
}

/// Register the coordinator and the cycle under their well-known names.
pub fn register(
    builder: OrchestrationRegistryBuilder,
    config: &EternalConfig,
    telemetry: Arc<dyn TelemetrySink>,
) -> OrchestrationRegistryBuilder {
    let owner = config.instance_id.clone();
    let delay_ms = config.cycle_delay_ms;
    builder
        .register(COORDINATOR, move |ctx: OrchestrationContext, input: String| {
            let owner = owner.clone();
            async move {
                let out = coordinator(ctx, input, &owner).await.map_err(|e| e.to_string())?;
                encode_output(&out).map_err(|e| e.to_string())
            }
        })
        .register(CYCLE, move |ctx: OrchestrationContext, input: String| {
            let telemetry = telemetry.clone();
            async move {
                let out = cycle(ctx, input, telemetry, delay_ms).await.map_err(|e| e.to_string())?;
                encode_output(&out).map_err(|e| e.to_string())
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correlation_is_required_and_validated() {
        assert_eq!(parse_correlation(""), Err(OrchestrationError::MissingCorrelationContext));
        assert_eq!(parse_correlation("{}"), Err(OrchestrationError::MissingCorrelationContext));
        assert_eq!(
            parse_correlation(r#"{"correlation":null}"#),
            Err(OrchestrationError::MissingCorrelationContext)
        );
        for bad in [r#"{"correlation":"00-abc"}"#, r#"{"correlation":{"trace_parent":"x"}}"#, "[1,2]", "not json"] {
            let err = parse_correlation(bad).unwrap_err();
            assert!(matches!(err, OrchestrationError::MalformedCorrelationContext { .. }), "{bad}: {err}");
        }

        let input = EternalInput::with_new_root();
        let parsed = parse_correlation(&input.to_json().unwrap()).unwrap();
        assert_eq!(Some(parsed), input.correlation);
    }

    #[test]
    fn outputs_encode_as_json_and_report_codec_errors() {
        let out = CycleOutcome {
            operation_id: "op".into(),
            fired_at_ms: 7,
        };
        let raw = encode_output(&out).unwrap();
        assert_eq!(serde_json::from_str::<CycleOutcome>(&raw).unwrap(), out);

        // Non-string map keys cannot be represented in JSON
        let bad = std::collections::HashMap::from([((1u8, 2u8), 3u8)]);
        let err = encode_output(&bad).unwrap_err();
        assert!(matches!(err, OrchestrationError::Codec(_)));
        assert!(!err.is_fatal());
        assert!(err.to_string().starts_with("codec:"));
    }
}
