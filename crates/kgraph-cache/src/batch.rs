use std::time::Duration;

/// One staged write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheOp {
    Set {
        key: String,
        value: String,
        ttl: Option<Duration>,
    },
    Delete {
        keys: Vec<String>,
    },
}

/// Ordered list of writes executed as a single pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<CacheOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a write with no expiry
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.ops.push(CacheOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: None,
        });
        self
    }

    /// Stage a write that expires after `ttl`
    pub fn set_with_ttl(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        ttl: Duration,
    ) -> &mut Self {
        self.ops.push(CacheOp::Set {
            key: key.into(),
            value: value.into(),
            ttl: Some(ttl),
        });
        self
    }

    /// Stage a delete. Empty key lists are ignored.
    pub fn delete(&mut self, keys: Vec<String>) -> &mut Self {
        if !keys.is_empty() {
            self.ops.push(CacheOp::Delete { keys });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[CacheOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<CacheOp> {
        self.ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_keeps_order_and_skips_empty_deletes() {
        let mut batch = WriteBatch::new();
        batch
            .set("kg:service:a", "{}")
            .delete(Vec::new())
            .set_with_ttl("kg:processed:1", "1", Duration::from_secs(60));

        assert_eq!(batch.len(), 2);
        assert!(matches!(&batch.ops()[0], CacheOp::Set { key, ttl: None, .. } if key == "kg:service:a"));
        assert!(matches!(&batch.ops()[1], CacheOp::Set { ttl: Some(_), .. }));
    }
}
