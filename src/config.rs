//! Configuration for the external tools and the recognition engine.
//!
//! Settings are layered. From highest to lowest priority: command-line flags,
//! environment variables (which may come from a `.env` file), a TOML config
//! file, and built-in defaults.

use std::{env, ffi::OsString, fs};

use clap::{Args, ValueEnum};
use toml_span::{DeserError, de_helpers::TableHelper};

use crate::{
    prelude::*,
    toml_utils::{describe_deser_error, deserialize_value_enum, from_toml_str},
};

/// Directory containing Poppler's `pdfinfo` and `pdftocairo`.
pub const POPPLER_PATH_VAR: &str = "OCR_DESK_POPPLER_PATH";

/// Path to the `tesseract` executable.
pub const TESSERACT_VAR: &str = "OCR_DESK_TESSERACT";

/// Default recognition language.
pub const LANGUAGE_VAR: &str = "OCR_DESK_LANG";

/// Language used when nobody asks for another one.
pub const DEFAULT_LANGUAGE: &str = "eng";

/// Resolution used to rasterize document pages.
pub const DEFAULT_DPI: u32 = 200;

/// Which recognizer Tesseract should use (`--oem`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EngineMode {
    /// The legacy pattern-matching engine only.
    Legacy,
    /// The neural network line recognizer only. Usually fastest.
    Lstm,
    /// Both engines combined. Usually the most accurate.
    LegacyLstm,
    /// Whatever the installed engine supports.
    #[default]
    Default,
}

impl EngineMode {
    /// The value passed to `tesseract --oem`.
    pub fn oem(self) -> u8 {
        match self {
            EngineMode::Legacy => 0,
            EngineMode::Lstm => 1,
            EngineMode::LegacyLstm => 2,
            EngineMode::Default => 3,
        }
    }
}

impl<'de> toml_span::Deserialize<'de> for EngineMode {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        deserialize_value_enum(value)
    }
}

/// How Tesseract should split a page into blocks of text (`--psm`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentationMode {
    /// Orientation and script detection only. Produces no text.
    OsdOnly = 0,
    /// Automatic segmentation with orientation and script detection.
    AutoOsd = 1,
    /// Automatic segmentation, but no OSD or OCR.
    AutoOnly = 2,
    /// Fully automatic segmentation, without OSD.
    #[default]
    Auto = 3,
    /// A single column of text of variable sizes.
    SingleColumn = 4,
    /// A single uniform block of vertically aligned text.
    SingleBlockVertical = 5,
    /// A single uniform block of text.
    SingleBlock = 6,
    /// A single line of text.
    SingleLine = 7,
    /// A single word.
    SingleWord = 8,
    /// A single word in a circle.
    CircleWord = 9,
    /// A single character.
    SingleChar = 10,
    /// As much text as possible, in no particular order.
    SparseText = 11,
    /// Sparse text with orientation and script detection.
    SparseTextOsd = 12,
    /// A single text line, bypassing Tesseract-specific hacks.
    RawLine = 13,
}

impl SegmentationMode {
    /// The value passed to `tesseract --psm`.
    pub fn psm(self) -> u8 {
        self as u8
    }
}

impl<'de> toml_span::Deserialize<'de> for SegmentationMode {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        deserialize_value_enum(value)
    }
}

/// Fixed settings for the recognition engine, shared by every page of a job.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineConfig {
    pub engine_mode: EngineMode,
    pub segmentation_mode: SegmentationMode,
}

/// Command-line options which override the configuration.
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOpts {
    /// A TOML config file.
    #[clap(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Directory containing Poppler's `pdfinfo` and `pdftocairo`. May also be
    /// set with OCR_DESK_POPPLER_PATH. Defaults to searching PATH.
    #[clap(long, value_name = "DIR")]
    pub poppler_path: Option<PathBuf>,

    /// The `tesseract` executable. May also be set with OCR_DESK_TESSERACT.
    #[clap(long, value_name = "PATH")]
    pub tesseract: Option<PathBuf>,

    /// Recognition language, passed verbatim to Tesseract (for example `eng`
    /// or `eng+deu`). May also be set with OCR_DESK_LANG.
    #[clap(short = 'l', long = "lang")]
    pub language: Option<String>,

    /// The DPI to use when rasterizing PDF pages.
    #[clap(long)]
    pub dpi: Option<u32>,

    /// Only process the first N pages of a document.
    #[clap(long)]
    pub max_pages: Option<usize>,

    /// Tesseract engine mode.
    #[clap(long = "oem", value_enum)]
    pub engine_mode: Option<EngineMode>,

    /// Tesseract page segmentation mode.
    #[clap(long = "psm", value_enum)]
    pub segmentation_mode: Option<SegmentationMode>,
}

/// The contents of a config file. Every setting is optional.
#[derive(Debug, Default, PartialEq)]
pub struct ConfigFile {
    pub poppler_path: Option<PathBuf>,
    pub tesseract: Option<PathBuf>,
    pub language: Option<String>,
    pub dpi: Option<u32>,
    pub max_pages: Option<u32>,
    pub engine_mode: Option<EngineMode>,
    pub segmentation_mode: Option<SegmentationMode>,
}

impl ConfigFile {
    /// Read a config file from disk.
    pub fn read(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {:?}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("invalid config file {:?}", path.display()))
    }

    /// Parse the text of a config file.
    pub fn parse(text: &str) -> Result<Self> {
        from_toml_str::<ConfigFile>(text)
            .map_err(|err| anyhow!("{}", describe_deser_error(text, &err)))
    }
}

impl<'de> toml_span::Deserialize<'de> for ConfigFile {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        let mut th = TableHelper::new(value)?;
        let poppler_path = th.optional::<String>("poppler_path").map(PathBuf::from);
        let tesseract = th.optional::<String>("tesseract").map(PathBuf::from);
        let language = th.optional("language");
        let dpi = th.optional("dpi");
        let max_pages = th.optional("max_pages");
        let engine = th.optional::<EngineSection>("engine").unwrap_or_default();
        th.finalize(None)?;
        Ok(Self {
            poppler_path,
            tesseract,
            language,
            dpi,
            max_pages,
            engine_mode: engine.engine_mode,
            segmentation_mode: engine.segmentation_mode,
        })
    }
}

/// The `[engine]` table of a config file.
#[derive(Debug, Default)]
struct EngineSection {
    engine_mode: Option<EngineMode>,
    segmentation_mode: Option<SegmentationMode>,
}

impl<'de> toml_span::Deserialize<'de> for EngineSection {
    fn deserialize(value: &mut toml_span::Value<'de>) -> Result<Self, DeserError> {
        let mut th = TableHelper::new(value)?;
        let engine_mode = th.optional("engine_mode");
        let segmentation_mode = th.optional("segmentation_mode");
        th.finalize(None)?;
        Ok(Self {
            engine_mode,
            segmentation_mode,
        })
    }
}

/// Our effective configuration.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Config {
    /// Directory holding the Poppler tools, or `None` to search `PATH`.
    pub poppler_path: Option<PathBuf>,
    /// The `tesseract` executable.
    pub tesseract: PathBuf,
    /// Default recognition language.
    pub language: String,
    /// Rasterization resolution for documents.
    pub dpi: u32,
    /// Maximum number of document pages to process.
    pub max_pages: Option<usize>,
    /// Recognition engine settings.
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poppler_path: None,
            tesseract: PathBuf::from("tesseract"),
            language: DEFAULT_LANGUAGE.to_owned(),
            dpi: DEFAULT_DPI,
            max_pages: None,
            engine: EngineConfig::default(),
        }
    }
}

impl Config {
    /// Load our configuration from the config file named in `opts` (if any),
    /// the process environment and `opts` itself.
    #[instrument(level = "debug", skip_all)]
    pub fn load(opts: &ConfigOpts) -> Result<Self> {
        let file = match &opts.config_path {
            Some(path) => ConfigFile::read(path)?,
            None => ConfigFile::default(),
        };
        let config = Self::layered(file, |name| env::var_os(name), opts)?;
        debug!(?config, "Loaded configuration");
        Ok(config)
    }

    /// Combine each layer of configuration. `lookup_env` is normally
    /// [`env::var_os`].
    pub fn layered(
        file: ConfigFile,
        lookup_env: impl Fn(&str) -> Option<OsString>,
        opts: &ConfigOpts,
    ) -> Result<Self> {
        // Empty variables are common in `.env` files, and mean "unset".
        let lookup_env = |name: &str| lookup_env(name).filter(|value| !value.is_empty());
        let defaults = Config::default();

        let poppler_path = opts
            .poppler_path
            .clone()
            .or_else(|| lookup_env(POPPLER_PATH_VAR).map(PathBuf::from))
            .or(file.poppler_path);
        let tesseract = opts
            .tesseract
            .clone()
            .or_else(|| lookup_env(TESSERACT_VAR).map(PathBuf::from))
            .or(file.tesseract)
            .unwrap_or(defaults.tesseract);
        let env_language = lookup_env(LANGUAGE_VAR)
            .map(|value| {
                value
                    .into_string()
                    .map_err(|value| anyhow!("{} is not valid UTF-8: {:?}", LANGUAGE_VAR, value))
            })
            .transpose()?;
        let language = opts
            .language
            .clone()
            .or(env_language)
            .or(file.language)
            .unwrap_or(defaults.language);
        let dpi = opts.dpi.or(file.dpi).unwrap_or(defaults.dpi);
        let max_pages = opts
            .max_pages
            .or(file.max_pages.map(|n| n as usize));
        let engine = EngineConfig {
            engine_mode: opts
                .engine_mode
                .or(file.engine_mode)
                .unwrap_or_default(),
            segmentation_mode: opts
                .segmentation_mode
                .or(file.segmentation_mode)
                .unwrap_or_default(),
        };

        if language.trim().is_empty() {
            return Err(anyhow!("recognition language must not be empty"));
        }
        if dpi == 0 {
            return Err(anyhow!("rasterization DPI must be greater than 0"));
        }
        if max_pages == Some(0) {
            return Err(anyhow!("--max-pages must be greater than 0"));
        }

        Ok(Self {
            poppler_path,
            tesseract,
            language,
            dpi,
            max_pages,
            engine,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn no_env(_: &str) -> Option<OsString> {
        None
    }

    #[test]
    fn defaults_match_tesseract_defaults() {
        let config =
            Config::layered(ConfigFile::default(), no_env, &ConfigOpts::default()).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.language, "eng");
        assert_eq!(config.engine.engine_mode.oem(), 3);
        assert_eq!(config.engine.segmentation_mode.psm(), 3);
    }

    #[test]
    fn parses_full_config_file() {
        let file = ConfigFile::parse(
            r#"
            poppler_path = "/opt/poppler/bin"
            tesseract = "/usr/local/bin/tesseract"
            language = "deu"
            dpi = 300
            max_pages = 10

            [engine]
            engine_mode = "lstm"
            segmentation_mode = "single-block"
            "#,
        )
        .unwrap();
        assert_eq!(
            file,
            ConfigFile {
                poppler_path: Some(PathBuf::from("/opt/poppler/bin")),
                tesseract: Some(PathBuf::from("/usr/local/bin/tesseract")),
                language: Some("deu".to_owned()),
                dpi: Some(300),
                max_pages: Some(10),
                engine_mode: Some(EngineMode::Lstm),
                segmentation_mode: Some(SegmentationMode::SingleBlock),
            }
        );
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(ConfigFile::parse("popler_path = \"/opt\"\n").is_err());
    }

    #[test]
    fn rejects_unknown_modes() {
        let err = ConfigFile::parse("[engine]\nengine_mode = \"turbo\"\n").unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("expected one of"), "{msg}");
        assert!(msg.starts_with("2:"), "{msg}");
    }

    #[test]
    fn flags_override_env_which_overrides_file() {
        let file = ConfigFile {
            language: Some("deu".to_owned()),
            poppler_path: Some(PathBuf::from("/from/file")),
            ..ConfigFile::default()
        };
        let env = HashMap::from([
            (LANGUAGE_VAR, OsString::from("fra")),
            (POPPLER_PATH_VAR, OsString::from("/from/env")),
            (TESSERACT_VAR, OsString::new()),
        ]);
        let lookup = |name: &str| env.get(name).cloned();

        let config = Config::layered(
            ConfigFile {
                language: file.language.clone(),
                poppler_path: file.poppler_path.clone(),
                ..ConfigFile::default()
            },
            lookup,
            &ConfigOpts::default(),
        )
        .unwrap();
        assert_eq!(config.language, "fra");
        assert_eq!(config.poppler_path, Some(PathBuf::from("/from/env")));
        // Empty variables are ignored.
        assert_eq!(config.tesseract, PathBuf::from("tesseract"));

        let opts = ConfigOpts {
            language: Some("spa".to_owned()),
            segmentation_mode: Some(SegmentationMode::SparseText),
            ..ConfigOpts::default()
        };
        let config = Config::layered(file, lookup, &opts).unwrap();
        assert_eq!(config.language, "spa");
        assert_eq!(config.engine.segmentation_mode.psm(), 11);
    }

    #[test]
    fn rejects_bad_values() {
        let opts = ConfigOpts {
            dpi: Some(0),
            ..ConfigOpts::default()
        };
        assert!(Config::layered(ConfigFile::default(), no_env, &opts).is_err());

        let opts = ConfigOpts {
            language: Some("  ".to_owned()),
            ..ConfigOpts::default()
        };
        assert!(Config::layered(ConfigFile::default(), no_env, &opts).is_err());
    }
}
