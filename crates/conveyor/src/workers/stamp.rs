use async_trait::async_trait;
use chrono::Utc;
use conveyor_core::{Consumer, Payload, StageName, WorkError, WorkerParams};
use serde_json::json;

/// Wraps each item with the stage, replica and time it passed through.
pub struct Stamp {
    stage: StageName,
    replica: usize,
}

impl Stamp {
    pub fn new(params: &WorkerParams) -> Self {
        Self {
            stage: params.stage.clone(),
            replica: params.replica,
        }
    }
}

#[async_trait]
impl Consumer for Stamp {
    async fn consume(&mut self, item: &Payload) -> Result<Option<Payload>, WorkError> {
        Ok(Some(json!({
            "value": item,
            "stage": self.stage.id(),
            "replica": self.replica,
            "extracted_at": Utc::now().to_rfc3339(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::tests::{params, queue};

    #[tokio::test]
    async fn test_wraps_item() {
        let input = queue("SymbolQueue");
        let mut stamp = Stamp::new(&params("Price", Some(&input), None, None, json!({})));

        let out = stamp.consume(&json!("AAPL")).await.unwrap().unwrap();
        assert_eq!(out["value"], json!("AAPL"));
        assert_eq!(out["stage"], json!("Price"));
        assert_eq!(out["replica"], json!(0));

        let at = out["extracted_at"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(at).is_ok());
    }
}
