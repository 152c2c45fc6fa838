use std::collections::HashMap;
use std::fs;
use std::path::{
  Path,
  PathBuf
};
use std::time::Duration;

use anyhow::{
  Context,
  anyhow
};
use tracing::{
  debug,
  info,
  trace,
  warn
};

use crate::backend::RetryPolicy;

const RC_ENV_VAR: &str = "DASHBOARDRC";
const RC_FILE_NAME: &str = ".dashboardrc";
const DATA_DIR_NAME: &str =
  ".task-dashboard";

#[derive(Debug, Clone)]
pub struct Config {
  map:              HashMap<String, String>,
  pub loaded_files: Vec<PathBuf>
}

impl Default for Config {
  fn default() -> Self {
    let mut map = HashMap::new();
    map.insert(
      "data.location".to_string(),
      format!("~/{DATA_DIR_NAME}")
    );
    map.insert(
      "color".to_string(),
      "on".to_string()
    );
    map.insert(
      "owner".to_string(),
      "local".to_string()
    );

    Self {
      map,
      loaded_files: vec![]
    }
  }
}

impl Config {
  #[tracing::instrument(skip(
    rc_override
  ))]
  pub fn load(
    rc_override: Option<&Path>
  ) -> anyhow::Result<Self> {
    let mut cfg = Config::default();

    let rc = resolve_rc_path(
      rc_override
    )?;
    if let Some(path) = rc {
      info!(rc = %path.display(), "loading dashboardrc");
      cfg.load_file(&path)?;
    } else {
      debug!(
        "no dashboardrc found; using \
         defaults"
      );
    }

    Ok(cfg)
  }

  #[tracing::instrument(skip(
    self, overrides
  ))]
  pub fn apply_overrides<I>(
    &mut self,
    overrides: I
  ) where
    I: IntoIterator<
      Item = (String, String)
    >
  {
    for (k, v) in overrides {
      let key = k
        .strip_prefix("rc.")
        .unwrap_or(&k)
        .to_string();
      debug!(key = %key, value = %v, "applying override");
      self.map.insert(key, v);
    }
  }

  pub fn get(
    &self,
    key: &str
  ) -> Option<String> {
    self.map.get(key).cloned()
  }

  pub fn get_bool(
    &self,
    key: &str
  ) -> Option<bool> {
    self
      .map
      .get(key)
      .map(|v| parse_bool(v))
  }

  pub fn get_u64(
    &self,
    key: &str
  ) -> anyhow::Result<Option<u64>> {
    let Some(raw) = self.map.get(key)
    else {
      return Ok(None);
    };
    raw
      .trim()
      .parse::<u64>()
      .map(Some)
      .map_err(|e| {
        anyhow!(
          "invalid value for {key}: \
           {raw:?} ({e})"
        )
      })
  }

  pub fn owner(&self) -> String {
    self
      .get("owner")
      .unwrap_or_else(|| {
        "local".to_string()
      })
  }

  pub fn iter(
    &self
  ) -> impl Iterator<Item = (&String, &String)>
  {
    self.map.iter()
  }

  #[tracing::instrument(skip(self))]
  fn load_file(
    &mut self,
    path: &Path
  ) -> anyhow::Result<()> {
    let path = expand_tilde(path);
    let text =
      fs::read_to_string(&path)
        .with_context(|| {
          format!(
            "failed to read {}",
            path.display()
          )
        })?;

    self
      .loaded_files
      .push(path.clone());

    let base_dir = path
      .parent()
      .map(|p| p.to_path_buf())
      .unwrap_or_else(|| {
        PathBuf::from(".")
      });

    for (line_num, raw_line) in
      text.lines().enumerate()
    {
      let mut line = raw_line.trim();
      if let Some((before, _)) =
        line.split_once('#')
      {
        line = before.trim();
      }

      if line.is_empty() {
        continue;
      }

      if let Some(include_rest) =
        line.strip_prefix("include ")
      {
        let include_path =
          resolve_include_path(
            &base_dir,
            include_rest.trim()
          )?;
        debug!(
            file = %path.display(),
            include = %include_path.display(),
            line = line_num + 1,
            "processing include"
        );

        if include_path == path {
          warn!(include = %include_path.display(), "file includes itself; skipping");
        } else if include_path.exists() {
          self
            .load_file(&include_path)?;
        } else {
          warn!(include = %include_path.display(), "include file does not exist; skipping");
        }
        continue;
      }

      let (k, v) = line
        .split_once('=')
        .ok_or_else(|| {
          anyhow!(
            "invalid config line \
             {}:{}: {}",
            path.display(),
            line_num + 1,
            raw_line
          )
        })?;

      let key = k.trim().to_string();
      let value = v.trim().to_string();
      trace!(key = %key, value = %value, "loaded config key");
      self.map.insert(key, value);
    }

    Ok(())
  }
}

/// Transition and debounce intervals, all configurable in milliseconds.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq,
)]
pub struct Timings {
  pub enter:        Duration,
  pub exit:         Duration,
  pub delete_delay: Duration,
  pub modal:        Duration,
  pub debounce:     Duration
}

impl Default for Timings {
  fn default() -> Self {
    Self {
      enter:        Duration::from_millis(
        600
      ),
      exit:         Duration::from_millis(
        500
      ),
      delete_delay: Duration::from_millis(
        500
      ),
      modal:        Duration::from_millis(
        300
      ),
      debounce:     Duration::from_millis(
        300
      )
    }
  }
}

impl Timings {
  pub fn from_config(
    cfg: &Config
  ) -> anyhow::Result<Self> {
    let defaults = Self::default();
    let ms = |key: &str,
              fallback: Duration|
     -> anyhow::Result<Duration> {
      Ok(
        cfg
          .get_u64(key)?
          .map(Duration::from_millis)
          .unwrap_or(fallback)
      )
    };

    Ok(Self {
      enter:        ms(
        "animation.enter.ms",
        defaults.enter
      )?,
      exit:         ms(
        "animation.exit.ms",
        defaults.exit
      )?,
      delete_delay: ms(
        "delete.delay.ms",
        defaults.delete_delay
      )?,
      modal:        ms(
        "modal.transition.ms",
        defaults.modal
      )?,
      debounce:     ms(
        "search.debounce.ms",
        defaults.debounce
      )?
    })
  }
}

pub fn retry_policy(
  cfg: &Config
) -> anyhow::Result<RetryPolicy> {
  let defaults = RetryPolicy::default();
  let to_u32 =
    |key: &str,
     fallback: u32|
     -> anyhow::Result<u32> {
      match cfg.get_u64(key)? {
        | Some(value) => {
          u32::try_from(value).map_err(
            |_| {
              anyhow!(
                "{key} out of range: \
                 {value}"
              )
            }
          )
        }
        | None => Ok(fallback)
      }
    };

  Ok(RetryPolicy {
    reads:  to_u32(
      "retry.reads",
      defaults.reads
    )?,
    writes: to_u32(
      "retry.writes",
      defaults.writes
    )?
  })
}

#[tracing::instrument(skip(
  cfg,
  override_dir
))]
pub fn resolve_data_dir(
  cfg: &Config,
  override_dir: Option<&Path>
) -> anyhow::Result<PathBuf> {
  let dir = if let Some(path) =
    override_dir
  {
    path.to_path_buf()
  } else if let Some(cfg_value) =
    cfg.get("data.location")
  {
    expand_tilde(Path::new(&cfg_value))
  } else {
    default_data_dir()?
  };

  if !dir.exists() {
    info!(dir = %dir.display(), "creating data directory");
    fs::create_dir_all(&dir)
      .with_context(|| {
        format!(
          "failed to create {}",
          dir.display()
        )
      })?;
  }

  Ok(dir)
}

#[tracing::instrument(skip(
  override_path
))]
fn resolve_rc_path(
  override_path: Option<&Path>
) -> anyhow::Result<Option<PathBuf>> {
  if let Some(path) = override_path {
    return Ok(Some(path.to_path_buf()));
  }

  if let Ok(rc_env) =
    std::env::var(RC_ENV_VAR)
  {
    if rc_env == "/dev/null" {
      return Ok(None);
    }
    return Ok(Some(PathBuf::from(
      rc_env
    )));
  }

  let Some(home) = dirs::home_dir()
  else {
    warn!(
      "cannot determine home \
       directory; skipping rc file"
    );
    return Ok(None);
  };
  let candidate = home.join(RC_FILE_NAME);
  if candidate.exists() {
    return Ok(Some(candidate));
  }

  Ok(None)
}

fn default_data_dir()
-> anyhow::Result<PathBuf> {
  let home = dirs::home_dir()
    .ok_or_else(|| {
      anyhow!(
        "cannot determine home \
         directory"
      )
    })?;
  Ok(home.join(DATA_DIR_NAME))
}

fn resolve_include_path(
  base_dir: &Path,
  include: &str
) -> anyhow::Result<PathBuf> {
  if include.trim().is_empty() {
    return Err(anyhow!(
      "include path cannot be empty"
    ));
  }

  let raw = PathBuf::from(include);
  let expanded = expand_tilde(&raw);
  if expanded.is_absolute() {
    Ok(expanded)
  } else {
    Ok(base_dir.join(expanded))
  }
}

fn expand_tilde(
  path: &Path
) -> PathBuf {
  let text = path.to_string_lossy();
  if let Some(rest) =
    text.strip_prefix("~/")
    && let Some(home) = dirs::home_dir()
  {
    return home.join(rest);
  }
  path.to_path_buf()
}

fn parse_bool(s: &str) -> bool {
  matches!(
    s.trim()
      .to_ascii_lowercase()
      .as_str(),
    "1" | "y" | "yes" | "on" | "true"
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn rc_file_with_include_and_comments()
  {
    let temp =
      tempdir().expect("tempdir");
    let extra =
      temp.path().join("timings.rc");
    fs::write(
      &extra,
      "animation.exit.ms = 250\n"
    )
    .unwrap();

    let main =
      temp.path().join("dashboardrc");
    fs::write(
      &main,
      "# dashboard settings\ncolor = \
       off  # no escapes\ninclude \
       timings.rc\nowner=alice\n"
    )
    .unwrap();

    let cfg =
      Config::load(Some(&main)).unwrap();
    assert_eq!(
      cfg.get_bool("color"),
      Some(false)
    );
    assert_eq!(cfg.owner(), "alice");
    assert_eq!(cfg.loaded_files.len(), 2);

    let timings =
      Timings::from_config(&cfg).unwrap();
    assert_eq!(
      timings.exit,
      Duration::from_millis(250)
    );
    assert_eq!(
      timings.enter,
      Duration::from_millis(600)
    );
  }

  #[test]
  fn malformed_line_is_rejected() {
    let temp =
      tempdir().expect("tempdir");
    let path = temp.path().join("rc");
    fs::write(&path, "just words\n")
      .unwrap();

    let err = Config::load(Some(&path))
      .unwrap_err();
    assert!(
      err
        .to_string()
        .contains("invalid config line")
    );
  }

  #[test]
  fn overrides_strip_rc_prefix() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![
      (
        "rc.retry.writes".to_string(),
        "3".to_string()
      ),
      (
        "search.debounce.ms".to_string(),
        "120".to_string()
      ),
    ]);

    let policy =
      retry_policy(&cfg).unwrap();
    assert_eq!(policy.writes, 3);
    assert_eq!(policy.reads, 2);
    assert_eq!(
      Timings::from_config(&cfg)
        .unwrap()
        .debounce,
      Duration::from_millis(120)
    );
  }

  #[test]
  fn non_numeric_timing_is_an_error() {
    let mut cfg = Config::default();
    cfg.apply_overrides(vec![(
      "delete.delay.ms".to_string(),
      "soon".to_string()
    )]);
    assert!(
      Timings::from_config(&cfg).is_err()
    );
  }

  #[test]
  fn data_dir_override_is_created() {
    let temp =
      tempdir().expect("tempdir");
    let target =
      temp.path().join("nested/data");
    let dir = resolve_data_dir(
      &Config::default(),
      Some(&target)
    )
    .unwrap();
    assert_eq!(dir, target);
    assert!(target.exists());
  }
}
