use uuid::Uuid;

/// Identity of one benchmark run, shared by everything it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    pub run_uri: Uuid,
    pub owner: String,
    pub benchmark: String,
}

impl RunContext {
    pub fn new(benchmark: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            run_uri: Uuid::new_v4(),
            owner: owner.into(),
            benchmark: benchmark.into(),
        }
    }

    /// Owned by whoever is running the process.
    pub fn for_current_user(benchmark: impl Into<String>) -> Self {
        Self::new(benchmark, common::current_owner())
    }

    pub fn with_run_uri(mut self, run_uri: Uuid) -> Self {
        self.run_uri = run_uri;
        self
    }

    /// Short form of the run id used in resource names.
    pub fn short_id(&self) -> String {
        self.run_uri.simple().to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id_is_prefix_of_run_uri() {
        let context = RunContext::for_current_user("network_throughput");
        assert_eq!(context.short_id().len(), 8);
        assert!(context.run_uri.simple().to_string().starts_with(&context.short_id()));
        assert!(!context.owner.is_empty());
    }
}
