//! Write the build version into compiled binaries.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::info;
use verstamp::VersionRecord;

use super::{expansion, join_all, template, Action, ActionError};
use crate::context::BuildContext;

/// Text attributes written into every stamped binary.
///
/// Values are templates, so `{platform}` or build variables may appear in
/// them. Completeness is checked when the configuration is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionAttributes {
    /// `CompanyName`.
    pub company_name: String,
    /// `FileDescription`.
    pub file_description: String,
    /// `InternalName`.
    pub internal_name: String,
    /// `LegalCopyright`.
    pub legal_copyright: String,
    /// `OriginalFilename`.
    pub original_filename: String,
    /// `ProductName`.
    pub product_name: String,
    /// String table language.
    pub language_id: u16,
    /// String table code page.
    pub code_page: u16,
}

impl Default for VersionAttributes {
    fn default() -> Self {
        Self {
            company_name: String::new(),
            file_description: String::new(),
            internal_name: String::new(),
            legal_copyright: String::new(),
            original_filename: String::new(),
            product_name: String::new(),
            language_id: verstamp::LANG_EN_US,
            code_page: verstamp::CODE_PAGE_UNICODE,
        }
    }
}

impl VersionAttributes {
    /// Names of text attributes that are empty.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            ("company_name", &self.company_name),
            ("file_description", &self.file_description),
            ("internal_name", &self.internal_name),
            ("legal_copyright", &self.legal_copyright),
            ("original_filename", &self.original_filename),
            ("product_name", &self.product_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    fn record(&self, version: &str, ctx: &BuildContext, platform: Option<&str>) -> Result<VersionRecord, ActionError> {
        let render = |value: &str| template::render(value, ctx, platform);
        Ok(VersionRecord {
            file_version: version.to_owned(),
            product_version: version.to_owned(),
            company_name: render(&self.company_name)?,
            file_description: render(&self.file_description)?,
            internal_name: render(&self.internal_name)?,
            legal_copyright: render(&self.legal_copyright)?,
            original_filename: render(&self.original_filename)?,
            product_name: render(&self.product_name)?,
            language_id: self.language_id,
            code_page: self.code_page,
        })
    }
}

/// Stamps the build version and attributes into one or more binaries.
///
/// Files are stamped concurrently on the blocking pool; the stamper itself
/// serializes writers of the same path.
#[derive(Debug, Clone)]
pub struct StampAction {
    files: Vec<String>,
    attributes: VersionAttributes,
    per_platform: bool,
}

impl StampAction {
    /// Create a stamp step for templated file paths.
    pub fn new(files: Vec<String>, attributes: VersionAttributes) -> Self {
        Self {
            files,
            attributes,
            per_platform: false,
        }
    }

    /// Stamp once per configured platform.
    #[must_use]
    pub fn per_platform(mut self, per_platform: bool) -> Self {
        self.per_platform = per_platform;
        self
    }
}

#[async_trait]
impl Action for StampAction {
    async fn execute(&self, ctx: &BuildContext) -> Result<(), ActionError> {
        let version = ctx.build_version().ok_or(ActionError::MissingVersion)?;

        let mut tasks = Vec::new();
        for platform in expansion(ctx, self.per_platform)? {
            let p = platform.as_deref();
            let record = self.attributes.record(version, ctx, p)?;
            for file in &self.files {
                let path = ctx.resolve(template::render(file, ctx, p)?);
                tasks.push(stamp_file(path, record.clone()));
            }
        }
        join_all(tasks).await
    }

    fn describe(&self) -> String {
        format!("stamp {}", self.files.join(", "))
    }
}

async fn stamp_file(path: PathBuf, record: VersionRecord) -> Result<(), ActionError> {
    let target = path.clone();
    let version = record.file_version.clone();
    tokio::task::spawn_blocking(move || verstamp::stamp(&target, &record))
        .await
        .map_err(|e| ActionError::Join(e.to_string()))??;
    info!(path = %path.display(), version = %version, "stamped binary");
    Ok(())
}
