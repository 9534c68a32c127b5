use crate::types::Config;
use anyhow::{ensure, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        let config = Self::from_yaml(&contents)?;
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(contents).context("parsing config YAML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.confirmation;
        ensure!(self.buffer.depth >= 2, "buffer.depth must be at least 2");
        ensure!(c.search_range >= 1, "confirmation.search_range must be at least 1");
        for (name, v) in [
            ("overlap_threshold", c.overlap_threshold),
            ("large_overlap_threshold", c.large_overlap_threshold),
            ("low_confidence_threshold", c.low_confidence_threshold),
            ("merge_iou_threshold", c.merge_iou_threshold),
        ] {
            ensure!(
                (0.0..=1.0).contains(&v),
                "confirmation.{} must be within [0, 1], got {}",
                name,
                v
            );
        }
        ensure!(
            c.overlap_threshold <= c.large_overlap_threshold,
            "confirmation.overlap_threshold ({}) exceeds large_overlap_threshold ({})",
            c.overlap_threshold,
            c.large_overlap_threshold
        );
        ensure!(
            c.corroborating_matches >= 1,
            "confirmation.corroborating_matches must be at least 1"
        );
        ensure!(self.chooser.stride >= 1, "chooser.stride must be at least 1");
        ensure!(
            self.chooser.jitter_threshold > 0.0,
            "chooser.jitter_threshold must be positive"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::types::{ChooserStrategy, Config};

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let cfg = Config::from_yaml("buffer:\n  depth: 8\nchooser:\n  strategy: stride\n").unwrap();
        assert_eq!(cfg.buffer.depth, 8);
        assert_eq!(cfg.chooser.strategy, ChooserStrategy::Stride);
        assert_eq!(cfg.chooser.stride, 4);
        assert_eq!(cfg.confirmation.corroborating_matches, 2);
    }

    #[test]
    fn test_rejects_tiny_buffer() {
        assert!(Config::from_yaml("buffer:\n  depth: 1\n").is_err());
    }

    #[test]
    fn test_rejects_inverted_overlap_thresholds() {
        let yaml = "confirmation:\n  overlap_threshold: 0.9\n  large_overlap_threshold: 0.6\n";
        assert!(Config::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_out_of_range_threshold() {
        let yaml = "confirmation:\n  low_confidence_threshold: 1.5\n";
        assert!(Config::from_yaml(yaml).is_err());
    }
}
