use resonance_core::config::ExtractionConfig;
use resonance_core::{Fragment, FragmentType};

/// Ranked fragments bucketed by type. Every bucket keeps global rank order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedPatterns {
    pub sessions: Vec<Fragment>,
    pub tasks: Vec<Fragment>,
    pub entities: Vec<Fragment>,
    pub decisions: Vec<Fragment>,
    pub episodic: Vec<Fragment>,
}

impl ExtractedPatterns {
    pub fn bucket(&self, fragment_type: FragmentType) -> &[Fragment] {
        match fragment_type {
            FragmentType::Session => &self.sessions,
            FragmentType::Task => &self.tasks,
            FragmentType::Entity => &self.entities,
            FragmentType::Decision => &self.decisions,
            FragmentType::Episodic => &self.episodic,
        }
    }

    fn bucket_mut(&mut self, fragment_type: FragmentType) -> &mut Vec<Fragment> {
        match fragment_type {
            FragmentType::Session => &mut self.sessions,
            FragmentType::Task => &mut self.tasks,
            FragmentType::Entity => &mut self.entities,
            FragmentType::Decision => &mut self.decisions,
            FragmentType::Episodic => &mut self.episodic,
        }
    }

    pub fn total(&self) -> usize {
        self.sessions.len() + self.tasks.len() + self.entities.len() + self.decisions.len() + self.episodic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

#[derive(Debug, Clone)]
pub struct PatternExtractor {
    caps: ExtractionConfig,
    activation_threshold: f64,
}

impl PatternExtractor {
    pub fn new(caps: ExtractionConfig, activation_threshold: f64) -> Self {
        Self {
            caps,
            activation_threshold,
        }
    }

    pub fn cap(&self, fragment_type: FragmentType) -> usize {
        match fragment_type {
            FragmentType::Session => self.caps.max_sessions,
            FragmentType::Task => self.caps.max_tasks,
            FragmentType::Entity => self.caps.max_entities,
            FragmentType::Decision => self.caps.max_decisions,
            FragmentType::Episodic => self.caps.max_episodic,
        }
    }

    /// Bucket `ranked` by type, skipping fragments below the activation
    /// threshold and anything past a bucket's cap.
    pub fn extract(&self, ranked: &[Fragment]) -> ExtractedPatterns {
        let mut patterns = ExtractedPatterns::default();
        for fragment in ranked.iter().filter(|f| f.activation >= self.activation_threshold) {
            let cap = self.cap(fragment.fragment_type);
            let bucket = patterns.bucket_mut(fragment.fragment_type);
            if bucket.len() < cap {
                bucket.push(fragment.clone());
            }
        }
        patterns
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resonance_core::FragmentSource;

    fn active(id: &str, t: FragmentType, activation: f64) -> Fragment {
        let mut f = Fragment::new(id, t, FragmentSource::Prefetched, id);
        f.resonance_score = activation;
        f.activation = activation;
        f
    }

    fn extractor() -> PatternExtractor {
        PatternExtractor::new(ExtractionConfig::default(), 0.3)
    }

    #[test]
    fn test_task_cap_keeps_top_fifteen() {
        // Already ranked: t0 is best
        let ranked: Vec<Fragment> = (0..20)
            .map(|i| active(&format!("t{}", i), FragmentType::Task, 1.0 - i as f64 * 0.01))
            .collect();
        let patterns = extractor().extract(&ranked);
        assert_eq!(patterns.tasks.len(), 15);
        let ids: Vec<&str> = patterns.tasks.iter().map(|f| f.id.as_str()).collect();
        let expected: Vec<String> = (0..15).map(|i| format!("t{}", i)).collect();
        assert_eq!(ids, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn test_below_threshold_is_ineligible() {
        let ranked = vec![
            active("in", FragmentType::Episodic, 0.3),
            active("out", FragmentType::Episodic, 0.2999),
        ];
        let patterns = extractor().extract(&ranked);
        assert_eq!(patterns.episodic.len(), 1);
        assert_eq!(patterns.episodic[0].id, "in");
    }

    #[test]
    fn test_buckets_are_independent_and_ordered() {
        let ranked = vec![
            active("s1", FragmentType::Session, 0.9),
            active("d1", FragmentType::Decision, 0.8),
            active("s2", FragmentType::Session, 0.7),
            active("e1", FragmentType::Entity, 0.6),
            active("s3", FragmentType::Session, 0.5),
        ];
        let patterns = extractor().extract(&ranked);
        let sessions: Vec<&str> = patterns.sessions.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(sessions, vec!["s1", "s2", "s3"]);
        assert_eq!(patterns.decisions.len(), 1);
        assert_eq!(patterns.entities.len(), 1);
        assert_eq!(patterns.bucket(FragmentType::Task).len(), 0);
        assert_eq!(patterns.total(), 5);
    }

    #[test]
    fn test_every_bucket_respects_its_cap() {
        let caps = ExtractionConfig {
            max_sessions: 1,
            max_tasks: 2,
            max_entities: 3,
            max_decisions: 1,
            max_episodic: 2,
        };
        let extractor = PatternExtractor::new(caps, 0.3);
        let types = [
            FragmentType::Session,
            FragmentType::Task,
            FragmentType::Entity,
            FragmentType::Decision,
            FragmentType::Episodic,
        ];
        let ranked: Vec<Fragment> = (0..50)
            .map(|i| active(&format!("f{}", i), types[i % types.len()], 0.9))
            .collect();
        let patterns = extractor.extract(&ranked);
        for t in types {
            assert_eq!(patterns.bucket(t).len(), extractor.cap(t));
        }
    }
}
