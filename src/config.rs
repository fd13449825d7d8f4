use std::{path::Path, str::FromStr};

use anyhow::{Result, bail};
use candle::DType;
use ini::{Ini, SectionSetter};
use tracing::warn;

use crate::transducer::JoinerConfig;

pub const SETTINGS_FILE: &str = "joiner.ini";
pub const DEFAULT_PREFIX: &str = "joiner";
pub const DEVICE_CPU: &str = "cpu";

#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub joiner: JoinerConfig,
    pub model_config: Option<String>,
    pub repo: Option<String>,
    pub weights: Option<String>,
    pub prefix: String,
    pub device: String,
    pub dtype: DType,
    pub folded: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            joiner: JoinerConfig::default(),
            model_config: None,
            repo: None,
            weights: None,
            prefix: DEFAULT_PREFIX.to_string(),
            device: DEVICE_CPU.to_string(),
            dtype: DType::F32,
            folded: false,
        }
    }
}

impl Settings {
    /// Reads `path`, falling back to defaults for a missing file or key.
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let conf = Ini::load_from_file(path.as_ref()).unwrap_or_default();
        Self::from_ini(&conf)
    }

    pub fn from_ini(conf: &Ini) -> Self {
        let default = JoinerConfig::default();
        let dtype = conf.get_str("dtype", "f32");
        let dtype = parse_dtype(&dtype).unwrap_or_else(|e| {
            warn!("{e}, using f32");
            DType::F32
        });

        Self {
            joiner: JoinerConfig {
                encoder_dim: conf.get_usize("encoder-dim", default.encoder_dim),
                decoder_dim: conf.get_usize("decoder-dim", default.decoder_dim),
                joiner_dim: conf.get_usize("joiner-dim", default.joiner_dim),
                vocab_size: conf.get_usize("vocab-size", default.vocab_size),
            },
            model_config: conf.get_opt("model-config"),
            repo: conf.get_opt("repo"),
            weights: conf.get_opt("weights"),
            prefix: conf.get_str("prefix", DEFAULT_PREFIX),
            device: conf.get_str("device", DEVICE_CPU),
            dtype,
            folded: conf.get_bool("folded", false),
        }
    }

    /// Dimensions from `model-config` when set, otherwise from the INI keys.
    pub fn joiner_config(&self) -> Result<JoinerConfig> {
        match &self.model_config {
            Some(path) => JoinerConfig::from_file(path),
            None => {
                self.joiner.validate()?;
                Ok(self.joiner)
            }
        }
    }

    pub fn to_ini(&self) -> Ini {
        let mut conf = Ini::new();
        let mut section = conf.with_general_section();
        section
            .set_usize("encoder-dim", self.joiner.encoder_dim)
            .set_usize("decoder-dim", self.joiner.decoder_dim)
            .set_usize("joiner-dim", self.joiner.joiner_dim)
            .set_usize("vocab-size", self.joiner.vocab_size)
            .set("prefix", &self.prefix)
            .set("device", &self.device)
            .set("dtype", dtype_name(self.dtype))
            .set_bool("folded", self.folded);
        for (key, value) in [
            ("model-config", &self.model_config),
            ("repo", &self.repo),
            ("weights", &self.weights),
        ] {
            if let Some(value) = value {
                section.set(key, value);
            }
        }
        conf
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.to_ini().write_to_file(path.as_ref())?;
        Ok(())
    }
}

pub fn parse_dtype(name: &str) -> Result<DType> {
    Ok(match name {
        "f32" => DType::F32,
        "f64" => DType::F64,
        "f16" => DType::F16,
        "bf16" => DType::BF16,
        _ => bail!("unsupported dtype {name:?}"),
    })
}

fn dtype_name(dtype: DType) -> &'static str {
    match dtype {
        DType::F64 => "f64",
        DType::F16 => "f16",
        DType::BF16 => "bf16",
        _ => "f32",
    }
}

trait IniSetter {
    fn set_bool(&mut self, key: &str, value: bool) -> &mut Self;
    fn set_usize(&mut self, key: &str, value: usize) -> &mut Self;
}

impl IniSetter for SectionSetter<'_> {
    fn set_bool(&mut self, key: &str, value: bool) -> &mut Self {
        self.set(key, (value as u32).to_string())
    }

    fn set_usize(&mut self, key: &str, value: usize) -> &mut Self {
        self.set(key, value.to_string())
    }
}

trait IniGetter {
    fn get_bool(&self, key: &str, default: bool) -> bool;
    fn get_usize(&self, key: &str, default: usize) -> usize;
    fn get_str(&self, key: &str, default: &str) -> String;
    fn get_opt(&self, key: &str) -> Option<String>;
}

impl IniGetter for Ini {
    fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.general_section().get(key) {
            Some(value) => !matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            ),
            _ => default,
        }
    }

    fn get_usize(&self, key: &str, default: usize) -> usize {
        usize::from_str(self.general_section().get(key).unwrap_or_default()).unwrap_or(default)
    }

    fn get_str(&self, key: &str, default: &str) -> String {
        self.general_section()
            .get(key)
            .unwrap_or(default)
            .to_string()
    }

    fn get_opt(&self, key: &str) -> Option<String> {
        self.general_section()
            .get(key)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load(dir.path().join("absent.ini"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn reads_keys_and_ignores_garbage() {
        let conf = Ini::load_from_str(
            "encoder-dim=384\njoiner-dim=oops\nvocab-size=5224\nrepo=\ndtype=f64\nfolded=1\nweights=joiner.safetensors\n",
        )
        .unwrap();
        let settings = Settings::from_ini(&conf);

        assert_eq!(settings.joiner, JoinerConfig::new(384, 512, 512, 5224));
        assert_eq!(settings.repo, None);
        assert_eq!(settings.weights.as_deref(), Some("joiner.safetensors"));
        assert_eq!(settings.dtype, DType::F64);
        assert!(settings.folded);
    }

    #[test]
    fn spelled_out_false_is_false() {
        for value in ["0", "false", "No", "OFF"] {
            let conf = Ini::load_from_str(&format!("folded={value}\n")).unwrap();
            assert!(!Settings::from_ini(&conf).folded, "{value}");
        }
        for value in ["1", "true", "yes"] {
            let conf = Ini::load_from_str(&format!("folded={value}\n")).unwrap();
            assert!(Settings::from_ini(&conf).folded, "{value}");
        }
    }

    #[test]
    fn unknown_dtype_falls_back_to_f32() {
        let conf = Ini::load_from_str("dtype=int3\n").unwrap();
        assert_eq!(Settings::from_ini(&conf).dtype, DType::F32);
        assert!(parse_dtype("int3").is_err());
    }

    #[test]
    fn save_then_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(SETTINGS_FILE);
        let settings = Settings {
            joiner: JoinerConfig::new(4, 6, 3, 5),
            weights: Some("w.safetensors".to_string()),
            dtype: DType::BF16,
            ..Default::default()
        };
        settings.save(&path)?;

        assert_eq!(Settings::load(&path), settings);
        Ok(())
    }

    #[test]
    fn zero_dimension_in_ini_is_an_error() {
        let conf = Ini::load_from_str("vocab-size=0\n").unwrap();
        assert!(Settings::from_ini(&conf).joiner_config().is_err());
    }
}
