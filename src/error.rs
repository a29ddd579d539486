/// Typed failure of orchestration code.
///
/// Precondition violations (`MissingCorrelationContext`,
/// `MalformedCorrelationContext`) are fatal: the host failed to establish the
/// execution context the orchestration requires, so the instance fails and is
/// not retried. The registry then allows the next trigger tick to start a
/// fresh run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationError {
    /// No correlation context was supplied with the input.
    MissingCorrelationContext,
    /// A correlation context was supplied but has the wrong shape.
    MalformedCorrelationContext { reason: String },
    /// A child orchestration ended in failure.
    SubOrchestrationFailed { instance: String, error: String },
    /// Input or output could not be encoded/decoded.
    Codec(String),
}

impl OrchestrationError {
    /// Precondition violations that indicate a caller contract breach.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrchestrationError::MissingCorrelationContext | OrchestrationError::MalformedCorrelationContext { .. }
        )
    }
}

impl std::fmt::Display for OrchestrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestrationError::MissingCorrelationContext => {
                write!(f, "precondition: expected a W3C correlation trace context, but the context is missing")
            }
            OrchestrationError::MalformedCorrelationContext { reason } => {
                write!(f, "precondition: malformed W3C correlation trace context: {reason}")
            }
            OrchestrationError::SubOrchestrationFailed { instance, error } => {
                write!(f, "sub-orchestration {instance} failed: {error}")
            }
            OrchestrationError::Codec(msg) => write!(f, "codec: {msg}"),
        }
    }
}

impl std::error::Error for OrchestrationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_errors_are_fatal() {
        assert!(OrchestrationError::MissingCorrelationContext.is_fatal());
        assert!(
            OrchestrationError::MalformedCorrelationContext {
                reason: "bad traceparent".into()
            }
            .is_fatal()
        );
        assert!(
            !OrchestrationError::SubOrchestrationFailed {
                instance: "Sub_1".into(),
                error: "boom".into()
            }
            .is_fatal()
        );
        assert!(!OrchestrationError::Codec("eof".into()).is_fatal());
    }

    #[test]
    fn display_names_the_failing_child() {
        let e = OrchestrationError::SubOrchestrationFailed {
            instance: "Sub_abc".into(),
            error: "precondition".into(),
        };
        let s = e.to_string();
        assert!(s.contains("Sub_abc") && s.contains("precondition"));
        let _err: Box<dyn std::error::Error> = Box::new(e);
    }
}
