//! Ordered set of equivalent upstream mirrors

use serde::Serialize;

/// One mirror of the generation API
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    /// Position in the priority order (0 = tried first)
    pub rank: usize,
    pub base_url: String,
}

impl Endpoint {
    /// URL of the `generateContent` method for `model` on this mirror
    pub fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

/// Static priority-ordered list of mirrors
///
/// Every job walks the full list from the top; there is no health tracking
/// shared between jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    endpoints: Vec<Endpoint>,
}

impl EndpointSet {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let endpoints = hosts
            .into_iter()
            .map(|h| h.as_ref().trim().trim_end_matches('/').to_string())
            .filter(|h| !h.is_empty())
            .enumerate()
            .map(|(rank, base_url)| Endpoint { rank, base_url })
            .collect();
        Self { endpoints }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Highest-priority mirror
    pub fn primary(&self) -> Option<&Endpoint> {
        self.endpoints.first()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl<'a> IntoIterator for &'a EndpointSet {
    type Item = &'a Endpoint;
    type IntoIter = std::slice::Iter<'a, Endpoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.endpoints.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_rank() {
        let set = EndpointSet::new(["https://intl.example/google", "https://cn.example/google/"]);
        let ranked: Vec<_> = set.iter().map(|e| (e.rank, e.base_url.as_str())).collect();
        assert_eq!(
            ranked,
            vec![
                (0, "https://intl.example/google"),
                (1, "https://cn.example/google"),
            ]
        );
        assert_eq!(set.primary().unwrap().rank, 0);
    }

    #[test]
    fn test_generate_url() {
        let set = EndpointSet::new(["https://intl.example/google/"]);
        assert_eq!(
            set.primary().unwrap().generate_url("gemini-3-pro-image-preview"),
            "https://intl.example/google/v1beta/models/gemini-3-pro-image-preview:generateContent"
        );
    }

    #[test]
    fn test_blank_hosts_dropped() {
        let set = EndpointSet::new(["", "  ", "http://localhost:1"]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.primary().unwrap().rank, 0);
    }
}
