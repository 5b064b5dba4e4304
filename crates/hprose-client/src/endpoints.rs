use hprose_common::{HproseError, Result};

/// Ordered list of equivalent server addresses.
///
/// Calls go to the current endpoint. [`fail_switch`](Self::fail_switch)
/// advances to the next one, wrapping around, and counts every wraparound as
/// a failure round.
#[derive(Debug, Clone)]
pub struct EndpointSet {
    uris: Vec<String>,
    index: usize,
    failround: u64,
}

impl EndpointSet {
    /// Creates a set starting at the first endpoint.
    ///
    /// # Errors
    ///
    /// [`HproseError::Configuration`] when `uris` is empty.
    pub fn new(uris: Vec<String>) -> Result<Self> {
        if uris.is_empty() {
            return Err(HproseError::Configuration("no endpoint configured".into()));
        }
        Ok(Self {
            uris,
            index: 0,
            failround: 0,
        })
    }

    pub fn current(&self) -> &str {
        &self.uris[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Number of times the rotation wrapped back to the first endpoint.
    pub fn failround(&self) -> u64 {
        self.failround
    }

    pub fn len(&self) -> usize {
        self.uris.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uris.is_empty()
    }

    pub fn uris(&self) -> &[String] {
        &self.uris
    }

    /// Moves to the next endpoint and returns it.
    pub fn fail_switch(&mut self) -> &str {
        self.index = (self.index + 1) % self.uris.len();
        if self.index == 0 {
            self.failround += 1;
        }
        self.current()
    }

    /// Replaces the endpoint list and starts over from its first entry.
    pub fn set_uris(&mut self, uris: Vec<String>) -> Result<()> {
        *self = Self::new(uris)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(uris: &[&str]) -> EndpointSet {
        EndpointSet::new(uris.iter().map(|u| u.to_string()).collect()).unwrap()
    }

    #[test]
    fn test_empty_set_is_rejected() {
        assert!(matches!(
            EndpointSet::new(Vec::new()),
            Err(HproseError::Configuration(_))
        ));
    }

    #[test]
    fn test_rotation_wraps_and_counts_rounds() {
        let mut endpoints = set(&["tcp://e0", "tcp://e1", "tcp://e2"]);
        assert_eq!(endpoints.current(), "tcp://e0");
        assert_eq!(endpoints.fail_switch(), "tcp://e1");
        assert_eq!(endpoints.failround(), 0);
        assert_eq!(endpoints.fail_switch(), "tcp://e2");
        assert_eq!(endpoints.fail_switch(), "tcp://e0");
        assert_eq!(endpoints.failround(), 1);
    }

    #[test]
    fn test_single_endpoint_counts_every_switch() {
        let mut endpoints = set(&["http://only"]);
        endpoints.fail_switch();
        endpoints.fail_switch();
        assert_eq!(endpoints.current(), "http://only");
        assert_eq!(endpoints.failround(), 2);
    }

    #[test]
    fn test_set_uris_resets_position() {
        let mut endpoints = set(&["ws://a", "ws://b"]);
        endpoints.fail_switch();
        endpoints.fail_switch();
        endpoints
            .set_uris(vec!["ws://c".to_string(), "ws://d".to_string()])
            .unwrap();
        assert_eq!(endpoints.current(), "ws://c");
        assert_eq!(endpoints.index(), 0);
        assert_eq!(endpoints.failround(), 0);
        assert!(endpoints.set_uris(Vec::new()).is_err());
        assert_eq!(endpoints.len(), 2);
    }
}
