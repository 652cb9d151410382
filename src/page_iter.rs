//! Turn a file into an ordered sequence of raster pages.
//!
//! Plain images become a single page. PDFs are rasterized with Poppler's
//! `pdftocairo` into a scratch directory, and each page is decoded only when
//! it is needed.

use std::{
    collections::BTreeMap,
    env::consts::EXE_SUFFIX,
    fs, io,
    sync::LazyLock,
    vec,
};

use image::{DynamicImage, ImageFormat, ImageReader};
use regex::Regex;
use tokio::process::Command;

use crate::{
    async_utils::{check_for_command_failure, spawn_blocking_propagating_panics},
    config::{Config, POPPLER_PATH_VAR},
    error::JobError,
    prelude::*,
};

/// Lines on standard error which mean Poppler failed, even if it exited
/// successfully.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Error lines which Poppler recovers from on its own.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// What sort of file are we looking at?
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// A single-page raster image.
    Image,
    /// A multi-page document which must be rasterized.
    Document,
}

impl FileKind {
    /// Extensions offered when picking an image.
    pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tiff", "bmp"];

    /// Extensions offered when picking a document.
    pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];

    /// Classify a file by its extension. Anything we don't recognize as a
    /// document is treated as an image.
    pub fn from_path(path: &Path) -> Self {
        match mime_guess::from_path(path).first_raw() {
            Some("application/pdf") => FileKind::Document,
            _ => FileKind::Image,
        }
    }

    /// Does `path` have one of the extensions we offer for this kind?
    pub fn has_known_extension(self, path: &Path) -> bool {
        let extensions = match self {
            FileKind::Image => Self::IMAGE_EXTENSIONS,
            FileKind::Document => Self::DOCUMENT_EXTENSIONS,
        };
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                extensions.iter().any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

/// A single page, ready for preprocessing.
#[derive(Debug)]
pub struct Page {
    /// 1-based position within the source.
    pub ordinal: usize,
    /// The raw page image.
    pub image: DynamicImage,
}

/// Options for rasterizing documents.
#[derive(Clone, Debug, Default)]
pub struct RasterizeOptions {
    /// Directory holding `pdfinfo` and `pdftocairo`, or `None` to use `PATH`.
    pub poppler_path: Option<PathBuf>,
    /// The DPI to use for rasterization.
    pub dpi: u32,
    /// The maximum number of pages to rasterize.
    pub max_pages: Option<usize>,
}

impl From<&Config> for RasterizeOptions {
    fn from(config: &Config) -> Self {
        Self {
            poppler_path: config.poppler_path.clone(),
            dpi: config.dpi,
            max_pages: config.max_pages,
        }
    }
}

impl RasterizeOptions {
    /// Find one of the Poppler tools.
    fn tool(&self, name: &str) -> Result<PathBuf> {
        let file_name = format!("{}{}", name, EXE_SUFFIX);
        match &self.poppler_path {
            Some(dir) if !dir.is_dir() => Err(anyhow!(
                "configured Poppler directory {:?} does not exist",
                dir.display()
            )),
            Some(dir) => Ok(dir.join(file_name)),
            None => Ok(PathBuf::from(file_name)),
        }
    }
}

/// Something which can split a file into pages.
#[async_trait]
pub trait PageResolver: Send + Sync + 'static {
    /// Open `path` and prepare to iterate over its pages.
    async fn resolve(&self, path: &Path) -> Result<PageIter, JobError>;
}

/// Resolves pages from the local file system.
pub struct LocalPageResolver {
    options: RasterizeOptions,
}

impl LocalPageResolver {
    pub fn new(options: RasterizeOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl PageResolver for LocalPageResolver {
    async fn resolve(&self, path: &Path) -> Result<PageIter, JobError> {
        match FileKind::from_path(path) {
            FileKind::Image => PageIter::from_image_path(path).await,
            FileKind::Document => PageIter::from_pdf(path, &self.options).await,
        }
    }
}

/// Where the remaining pages come from.
enum PendingPages {
    /// Already decoded.
    Decoded(vec::IntoIter<DynamicImage>),
    /// Rasterized PNG files, in page order.
    Files(vec::IntoIter<PathBuf>),
}

/// An iterator over the pages of one source file.
///
/// Each page is produced only when asked for, and rasterized page files are
/// deleted as soon as they have been read, so only one page is held in
/// memory at a time.
pub struct PageIter {
    /// The file we're reading, for error messages.
    path: PathBuf,
    /// Scratch directory holding rasterized pages, released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
    /// Pages we haven't returned yet.
    pending: PendingPages,
    /// Number of pages this iterator will return.
    page_count: usize,
    /// Number of pages in the source file, which may be more than
    /// `page_count` if we were limited by `max_pages`.
    source_page_count: usize,
    /// Ordinal of the next page.
    next_ordinal: usize,
}

impl PageIter {
    /// Decode a plain image as a single page.
    #[instrument(level = "debug", skip_all, fields(path = %path.display()))]
    pub async fn from_image_path(path: &Path) -> Result<Self, JobError> {
        let owned_path = path.to_owned();
        let image = spawn_blocking_propagating_panics(move || decode_image(&owned_path))
            .await
            .map_err(|source| JobError::ImageDecode {
                path: path.to_owned(),
                source,
            })?;
        Ok(Self {
            path: path.to_owned(),
            tmpdir: None,
            pending: PendingPages::Decoded(vec![image].into_iter()),
            page_count: 1,
            source_page_count: 1,
            next_ordinal: 1,
        })
    }

    /// Wrap images which have already been decoded.
    #[cfg(test)]
    pub fn from_images(path: &Path, images: Vec<DynamicImage>) -> Self {
        let page_count = images.len();
        Self {
            path: path.to_owned(),
            tmpdir: None,
            pending: PendingPages::Decoded(images.into_iter()),
            page_count,
            source_page_count: page_count,
            next_ordinal: 1,
        }
    }

    /// Rasterize a PDF.
    #[instrument(level = "debug", skip_all, fields(path = %path.display(), dpi = options.dpi))]
    pub async fn from_pdf(path: &Path, options: &RasterizeOptions) -> Result<Self, JobError> {
        Self::from_pdf_inner(path, options)
            .await
            .map_err(|source| JobError::Rasterization {
                path: path.to_owned(),
                source,
            })
    }

    async fn from_pdf_inner(path: &Path, options: &RasterizeOptions) -> Result<Self> {
        let pdfinfo = options.tool("pdfinfo")?;
        let pdftocairo = options.tool("pdftocairo")?;

        // Count the pages, and decide how many we'll actually rasterize.
        let source_page_count = get_pdf_page_count(&pdfinfo, path).await?;
        if source_page_count == 0 {
            return Err(anyhow!("document has no pages"));
        }
        let page_count = match options.max_pages {
            Some(max_pages) if source_page_count > max_pages => {
                warn!(
                    path = %path.display(),
                    max_pages,
                    source_page_count,
                    "Only processing the first {} pages",
                    max_pages
                );
                max_pages
            }
            _ => source_page_count,
        };

        // Create a temporary directory to hold the PNG files.
        let tmpdir = tempfile::TempDir::with_prefix("ocr-desk-pages")
            .context("cannot create scratch directory")?;

        // Run pdftocairo to convert the PDF to PNG files. It appends a
        // zero-padded page number to `out_prefix`.
        let out_prefix = tmpdir.path().join("page");
        let mut cmd = Command::new(&pdftocairo);
        cmd.arg("-png")
            .arg("-r")
            .arg(options.dpi.to_string())
            .arg("-l")
            .arg(page_count.to_string())
            .arg(path)
            .arg(&out_prefix);
        let output = cmd
            .output()
            .await
            .map_err(|err| tool_error(&pdftocairo, err))?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        // Collect the page files in order.
        let tmpdir_path = tmpdir.path();
        let mut page_paths = tmpdir_path
            .read_dir()
            .with_context(|| {
                format!(
                    "failed to read temporary directory {:?}",
                    tmpdir_path.display()
                )
            })?
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<io::Result<Vec<_>>>()
            .context("failed to list rasterized pages")?;
        page_paths.sort();
        if page_paths.len() != page_count {
            return Err(anyhow!(
                "pdftocairo produced {} pages, but expected {}",
                page_paths.len(),
                page_count
            ));
        }
        debug!(page_count, "Rasterized document");

        Ok(Self {
            path: path.to_owned(),
            tmpdir: Some(tmpdir),
            pending: PendingPages::Files(page_paths.into_iter()),
            page_count,
            source_page_count,
            next_ordinal: 1,
        })
    }

    /// How many pages will this iterator return?
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Does the source file have more than one page?
    pub fn is_multi_page(&self) -> bool {
        self.source_page_count > 1
    }

    /// Read, delete and decode one rasterized page.
    fn read_page_file(&self, page_path: &Path) -> Result<DynamicImage, JobError> {
        let read = || -> Result<DynamicImage> {
            let bytes = fs::read(page_path)
                .with_context(|| format!("failed to read file {:?}", page_path.display()))?;
            // Delete the file to recover space a bit early.
            fs::remove_file(page_path)
                .with_context(|| format!("failed to delete file {:?}", page_path.display()))?;
            image::load_from_memory_with_format(&bytes, ImageFormat::Png)
                .with_context(|| format!("failed to decode {:?}", page_path.display()))
        };
        read().map_err(|source| JobError::Rasterization {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for PageIter {
    fn drop(&mut self) {
        // Delete our temporary directory, if we have one.
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

impl Iterator for PageIter {
    type Item = Result<Page, JobError>;

    fn next(&mut self) -> Option<Self::Item> {
        let image = match &mut self.pending {
            PendingPages::Decoded(images) => Ok(images.next()?),
            PendingPages::Files(paths) => {
                let page_path = paths.next()?;
                self.read_page_file(&page_path)
            }
        };
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;
        Some(image.map(|image| Page { ordinal, image }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.page_count + 1 - self.next_ordinal;
        (remaining, Some(remaining))
    }
}

/// Decode an image file, guessing the format from its contents.
fn decode_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)
        .with_context(|| format!("failed to open {:?}", path.display()))?
        .with_guessed_format()
        .with_context(|| format!("failed to read {:?}", path.display()))?
        .decode()
        .with_context(|| format!("unsupported or corrupt image {:?}", path.display()))
}

/// Explain why we couldn't start one of the Poppler tools.
fn tool_error(tool: &Path, err: io::Error) -> anyhow::Error {
    if err.kind() == io::ErrorKind::NotFound {
        anyhow!(
            "cannot find {:?}; install Poppler, or set --poppler-path or {}",
            tool.display(),
            POPPLER_PATH_VAR
        )
    } else {
        anyhow::Error::new(err).context(format!("failed to run {:?}", tool.display()))
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub async fn get_pdf_page_count(pdfinfo: &Path, path: &Path) -> Result<usize> {
    // Run pdfinfo to get the number of pages.
    let output = Command::new(pdfinfo)
        .arg(path)
        .output()
        .await
        .map_err(|err| tool_error(pdfinfo, err))?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties.
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    let properties = output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect::<BTreeMap<_, _>>();

    // Get the number of pages from the properties.
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    page_count_str.parse::<usize>().with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma, RgbImage};

    use super::*;

    #[test]
    fn is_error_line_works() {
        assert!(is_error_line("error: something went wrong"));
        assert!(is_error_line("Syntax Error: Couldn't read xref table"));
        assert!(!is_error_line("Warning: something is odd"));
        assert!(!is_error_line(
            "Internal Error: xref num 1234 not found but needed, document has changes, reconstruct aborted"
        ));
    }

    #[test]
    fn classifies_files_by_extension() {
        assert_eq!(FileKind::from_path(Path::new("scan.pdf")), FileKind::Document);
        assert_eq!(FileKind::from_path(Path::new("scan.png")), FileKind::Image);
        assert_eq!(FileKind::from_path(Path::new("scan.jpeg")), FileKind::Image);
        assert_eq!(FileKind::from_path(Path::new("scan")), FileKind::Image);

        assert!(FileKind::Image.has_known_extension(Path::new("a.TIFF")));
        assert!(FileKind::Image.has_known_extension(Path::new("a.bmp")));
        assert!(!FileKind::Image.has_known_extension(Path::new("a.pdf")));
        assert!(FileKind::Document.has_known_extension(Path::new("a.pdf")));
        assert!(!FileKind::Document.has_known_extension(Path::new("a")));
    }

    #[tokio::test]
    async fn image_is_a_single_page() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("page.png");
        RgbImage::from_pixel(12, 7, image::Rgb([10, 20, 30])).save(&path)?;

        let resolver = LocalPageResolver::new(RasterizeOptions::default());
        let pages = resolver.resolve(&path).await?;
        assert_eq!(pages.page_count(), 1);
        assert!(!pages.is_multi_page());
        let pages = pages.collect::<Result<Vec<_>, _>>()?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].ordinal, 1);
        assert_eq!((pages[0].image.width(), pages[0].image.height()), (12, 7));
        Ok(())
    }

    #[tokio::test]
    async fn image_format_is_guessed_from_contents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mislabelled.jpg");
        GrayImage::from_pixel(3, 3, Luma([200])).save_with_format(&path, ImageFormat::Png)?;

        let pages = PageIter::from_image_path(&path).await?;
        assert_eq!(pages.page_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn corrupt_image_is_a_decode_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("corrupt.png");
        fs::write(&path, b"definitely not a PNG")?;

        let err = PageIter::from_image_path(&path).await.err().unwrap();
        assert!(matches!(err, JobError::ImageDecode { .. }), "{err:?}");
        Ok(())
    }

    #[tokio::test]
    async fn missing_image_is_a_decode_error() {
        let err = PageIter::from_image_path(Path::new("no/such/file.png"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, JobError::ImageDecode { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn missing_poppler_directory_is_a_rasterization_error() {
        let options = RasterizeOptions {
            poppler_path: Some(PathBuf::from("/no/such/poppler/bin")),
            dpi: 200,
            max_pages: None,
        };
        let err = PageIter::from_pdf(Path::new("doc.pdf"), &options)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, JobError::Rasterization { .. }), "{err:?}");
        assert!(err.user_message().contains("does not exist"), "{err:?}");
    }

    #[test]
    fn in_memory_pages_are_numbered_from_one() {
        let images = (0..3)
            .map(|_| DynamicImage::ImageLuma8(GrayImage::new(2, 2)))
            .collect();
        let pages = PageIter::from_images(Path::new("test.pdf"), images);
        assert!(pages.is_multi_page());
        assert_eq!(pages.size_hint(), (3, Some(3)));
        let ordinals = pages.map(|page| page.unwrap().ordinal).collect::<Vec<_>>();
        assert_eq!(ordinals, vec![1, 2, 3]);
    }
}
