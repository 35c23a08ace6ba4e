//! Translation of content into index documents.
//!
//! Translators are looked up by media type. A default translator, when set,
//! handles any media type without a dedicated one.

use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use sift_types::{IndexDocument, Job};

use crate::content::ContentSource;
use crate::error::IndexingError;

/// Everything a translator receives for one job.
pub struct TranslationRequest<'a> {
    /// The job being executed
    pub job: &'a Job,
    /// Raw content
    pub reader: &'a mut (dyn Read + Send),
    /// Media type of the content
    pub media_type: &'a str,
    /// Index parameters overridden by job parameters
    pub parameters: &'a HashMap<String, String>,
}

/// Turns raw content into zero or more index documents.
pub trait ContentTranslator: Send + Sync {
    /// Media types this translator handles when registered with
    /// [`TranslatorRegistry::register`].
    fn media_types(&self) -> Vec<String> {
        Vec::new()
    }

    fn translate(
        &self,
        request: TranslationRequest<'_>,
    ) -> Result<Vec<IndexDocument>, IndexingError>;
}

/// Thread-safe media type → translator lookup.
#[derive(Default)]
pub struct TranslatorRegistry {
    translators: RwLock<HashMap<String, Arc<dyn ContentTranslator>>>,
    default: RwLock<Option<Arc<dyn ContentTranslator>>>,
}

impl TranslatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a translator for every media type it advertises.
    pub fn register(&self, translator: Arc<dyn ContentTranslator>) {
        for media_type in translator.media_types() {
            self.register_for(media_type, translator.clone());
        }
    }

    /// Register a translator for one media type, replacing any previous one.
    pub fn register_for(&self, media_type: impl Into<String>, translator: Arc<dyn ContentTranslator>) {
        let media_type = media_type.into();
        debug!(media_type = %media_type, "Registered translator");
        self.translators
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(media_type, translator);
    }

    /// Set the translator used when no dedicated one matches.
    pub fn set_default(&self, translator: Arc<dyn ContentTranslator>) {
        *self.default.write().unwrap_or_else(PoisonError::into_inner) = Some(translator);
    }

    /// Whether a dedicated translator exists for the media type.
    pub fn supports(&self, media_type: &str) -> bool {
        self.translators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(media_type)
    }

    /// Find the translator for a media type.
    pub fn resolve(&self, media_type: &str) -> Result<Arc<dyn ContentTranslator>, IndexingError> {
        if let Some(translator) = self
            .translators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(media_type)
        {
            return Ok(translator.clone());
        }
        self.default
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| IndexingError::UnsupportedMediaType(media_type.to_string()))
    }

    /// Translate a job's content source.
    ///
    /// `index_parameters` come from the target engine; job parameters take
    /// precedence over them.
    pub fn translate(
        &self,
        job: &Job,
        source: &mut ContentSource,
        index_parameters: HashMap<String, String>,
    ) -> Result<Vec<IndexDocument>, IndexingError> {
        if source.media_type.is_empty() {
            return Err(IndexingError::MissingMediaType(
                job.content_id().unwrap_or_default().to_string(),
            ));
        }
        let translator = self.resolve(&source.media_type)?;

        let mut parameters = index_parameters;
        parameters.extend(
            job.parameters()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        translator.translate(TranslationRequest {
            job,
            reader: source.reader.as_mut(),
            media_type: &source.media_type,
            parameters: &parameters,
        })
    }
}
