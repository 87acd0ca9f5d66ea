//! OSEM run parameters, the one piece of configuration the core
//! itself understands (everything else, e.g. scanner/projection
//! headers, is parsed by an external collaborator).

use serde::Deserialize;

fn one_i32() -> i32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct OsemConfig {
    #[serde(default = "one_i32")]
    pub n_iterations: i32,

    #[serde(default = "one_i32")]
    pub n_subsets: i32,

    #[serde(default)]
    pub save_interval: i32,

    #[serde(default)]
    pub cut_radius: f64,

    #[serde(default)]
    pub convolution_interval: i32,

    #[serde(default)]
    pub fwhm_xyz: [f64; 3],

    #[serde(default = "default_true")]
    pub recompute_sensitivity: bool,

    #[serde(default = "default_true")]
    pub recompute_atten_corr: bool,
}

impl Default for OsemConfig {
    fn default() -> Self {
        Self {
            n_iterations: 1,
            n_subsets: 1,
            save_interval: 0,
            cut_radius: 0.0,
            convolution_interval: 0,
            fwhm_xyz: [0.0, 0.0, 0.0],
            recompute_sensitivity: true,
            recompute_atten_corr: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_driver() {
        let config = OsemConfig::default();
        assert_eq!(config.n_iterations, 1);
        assert_eq!(config.n_subsets, 1);
        assert_eq!(config.save_interval, 0);
        assert!(config.recompute_sensitivity);
        assert!(config.recompute_atten_corr);
    }

    #[test]
    fn deserializes_partial_toml_with_defaults() {
        let config: OsemConfig = toml::from_str("n_iterations = 4\nn_subsets = 8\n").unwrap();
        assert_eq!(config.n_iterations, 4);
        assert_eq!(config.n_subsets, 8);
        assert_eq!(config.cut_radius, 0.0);
    }
}
