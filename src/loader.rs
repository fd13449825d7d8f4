use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use candle::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use hf_hub::{Repo, api::sync::Api};
use tracing::{debug, info};

use crate::{
    config::{DEVICE_CPU, Settings},
    transducer::{Joiner, JoinerConfig, Projection},
};

/// Builds joiners from [`Settings`]: either from a safetensors checkpoint or,
/// without one, from freshly initialised variables kept in a [`VarMap`].
pub struct JoinerLoader {
    device: Device,
    dtype: DType,
    config: JoinerConfig,
    prefix: String,
    weights: Option<PathBuf>,
    varmap: VarMap,
}

impl JoinerLoader {
    pub fn new(settings: &Settings) -> Result<Self> {
        let device = device(&settings.device)?;
        if device.is_cpu() && settings.dtype == DType::BF16 {
            bail!("dtype bf16 is not supported on the cpu device, use f32, f16 or f64");
        }
        let config = settings.joiner_config()?;
        let weights = resolve_weights(settings)?;

        Ok(Self {
            device,
            dtype: settings.dtype,
            config,
            prefix: settings.prefix.clone(),
            weights,
            varmap: VarMap::new(),
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn config(&self) -> &JoinerConfig {
        &self.config
    }

    pub fn weights(&self) -> Option<&Path> {
        self.weights.as_deref()
    }

    /// Variables created when no checkpoint is configured. Empty otherwise.
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn build<P: Projection>(&self) -> Result<Joiner<P>> {
        let vb = match &self.weights {
            Some(path) => {
                debug!(?path, "mapping checkpoint");
                unsafe { VarBuilder::from_mmaped_safetensors(&[path], self.dtype, &self.device)? }
            }
            None => VarBuilder::from_varmap(&self.varmap, self.dtype, &self.device),
        };
        let vb = if self.prefix.is_empty() {
            vb
        } else {
            vb.pp(&self.prefix)
        };

        let joiner = Joiner::new(&self.config, vb)
            .with_context(|| format!("loading joiner under {:?}", self.prefix))?;
        Ok(joiner)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.varmap.save(path.as_ref())?;
        info!(path = ?path.as_ref(), "saved weights");
        Ok(())
    }
}

pub fn device(name: &str) -> Result<Device> {
    let device = match name {
        DEVICE_CPU => Device::Cpu,
        "cuda" => Device::new_cuda(0)?,
        _ => match name.strip_prefix("cuda:") {
            Some(ordinal) => Device::new_cuda(ordinal.parse()?)?,
            None => bail!("unknown device {name:?}"),
        },
    };
    Ok(device)
}

fn resolve_weights(settings: &Settings) -> Result<Option<PathBuf>> {
    let Some(weights) = &settings.weights else {
        return Ok(None);
    };

    let path = match &settings.repo {
        Some(repo_id) => {
            info!(%repo_id, %weights, "fetching weights");
            let api = Api::new()?;
            let repo = api.repo(Repo::model(repo_id.to_string()));
            repo.get(weights)?
        }
        None => PathBuf::from(weights),
    };
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_devices() {
        assert!(device("cpu").unwrap().is_cpu());
        assert!(device("tpu").is_err());
        assert!(device("cuda:x").is_err());
    }

    #[test]
    fn bf16_is_rejected_on_cpu() {
        let settings = Settings {
            joiner: JoinerConfig::new(4, 4, 3, 5),
            dtype: DType::BF16,
            ..Default::default()
        };
        let err = JoinerLoader::new(&settings).err().unwrap();
        assert!(err.to_string().contains("bf16"), "{err}");

        let settings = Settings {
            dtype: DType::F16,
            ..settings
        };
        assert!(JoinerLoader::new(&settings).is_ok());
    }

    #[test]
    fn fresh_loader_reuses_variables() -> Result<()> {
        let settings = Settings {
            joiner: JoinerConfig::new(4, 4, 3, 5),
            ..Default::default()
        };
        let loader = JoinerLoader::new(&settings)?;
        assert!(loader.weights().is_none());

        let _: Joiner = loader.build()?;
        let vars = loader.varmap().all_vars().len();
        let _: Joiner = loader.build()?;

        assert_eq!(vars, 12);
        assert_eq!(loader.varmap().all_vars().len(), vars);
        assert!(loader
            .varmap()
            .data()
            .lock()
            .unwrap()
            .contains_key("joiner.encoder_proj.weight_scale"));
        Ok(())
    }
}
