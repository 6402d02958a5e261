#[derive(Debug, Clone)]
pub struct TelemetryLabels {
    pub service: String,
    pub outcome: Option<String>,
}

impl TelemetryLabels {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            outcome: None,
        }
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    /// Label pairs attached to metrics. Session ids never become labels;
    /// they only travel on spans.
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = vec![("service".to_string(), self.service.clone())];
        if let Some(outcome) = &self.outcome {
            tags.push(("outcome".into(), outcome.clone()));
        }
        tags
    }
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: String,
    pub target: String,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            target: target.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_carry_service_then_outcome() {
        let labels = TelemetryLabels::new("dispatch").with_outcome("acknowledged");
        assert_eq!(
            labels.tags(),
            vec![
                ("service".to_string(), "dispatch".to_string()),
                ("outcome".to_string(), "acknowledged".to_string()),
            ]
        );
        assert_eq!(TelemetryLabels::new("history").tags().len(), 1);
    }
}
