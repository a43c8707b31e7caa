//! Host templates and images of the provider.

use safescale_iaas::retry::{self, Retry};
use safescale_iaas::{
    Error, ErrorKind, HostTemplate, Image, ProviderStack, Result, SizingRequirements,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Upper bound of an image lookup, the provider catalog being eventually
/// consistent after updates.
const IMAGE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Catalog access for one provider stack, built once per service.
pub struct TemplateRepository {
    stack: Arc<dyn ProviderStack>,
    catalog: OnceCell<Vec<HostTemplate>>,
}

impl TemplateRepository {
    pub fn new(stack: Arc<dyn ProviderStack>) -> Self {
        Self {
            stack,
            catalog: OnceCell::new(),
        }
    }

    /// All templates, fetched from the provider on first use.
    pub async fn list(&self) -> Result<&[HostTemplate]> {
        let catalog = self
            .catalog
            .get_or_try_init(|| async {
                let templates = self.stack.list_templates().await?;
                tracing::debug!("cached {} host templates", templates.len());
                Ok::<_, Error>(templates)
            })
            .await?;
        Ok(catalog.as_slice())
    }

    /// Finds a template by ID or name.
    pub async fn find(&self, reference: &str) -> Result<HostTemplate> {
        self.list()
            .await?
            .iter()
            .find(|t| t.id == reference || t.name == reference)
            .cloned()
            .ok_or_else(|| Error::not_found("template", reference))
    }

    /// Templates matching `sizing`, in the order the provider ranks them.
    pub async fn select(
        &self,
        sizing: &SizingRequirements,
        force: bool,
    ) -> Result<Vec<HostTemplate>> {
        self.stack.select_templates_by_size(sizing, force).await
    }

    pub async fn images(&self) -> Result<Vec<Image>> {
        self.stack.list_images().await
    }

    /// Resolves an OS name to a provider image, retrying every second for
    /// up to ten seconds.
    pub async fn resolve_image(&self, os_name: &str, cancel: &CancellationToken) -> Result<Image> {
        if os_name.trim().is_empty() {
            return Err(Error::invalid_parameter("image", "cannot be empty"));
        }

        let stack = &self.stack;
        let outcome = retry::while_unsuccessful_delay_1s(
            move || async move {
                stack.search_image(os_name).await.map_err(|e| match e.kind() {
                    ErrorKind::InvalidRequest | ErrorKind::InvalidParameter => Retry::Stop(e),
                    _ => Retry::Again(e),
                })
            },
            IMAGE_LOOKUP_TIMEOUT,
            cancel,
        )
        .await;

        match outcome {
            // report a missing image as such rather than as a timeout
            Err(Error::Timeout {
                cause: Some(cause), ..
            }) if cause.is_not_found() => Err(Error::not_found("image", os_name)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safescale_stack_sandbox::SandboxStack;

    fn repository() -> TemplateRepository {
        TemplateRepository::new(Arc::new(SandboxStack::ephemeral()))
    }

    #[tokio::test]
    async fn test_find_by_id_or_name() {
        let repo = repository();
        assert_eq!(repo.find("s2.medium").await.unwrap().id, "tpl-s2.medium");
        assert_eq!(repo.find("tpl-s2.medium").await.unwrap().name, "s2.medium");
        assert!(repo.find("huge").await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_missing_image_is_not_found() {
        let repo = repository();
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();

        let err = repo.resolve_image("Windows", &cancel).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        // the lookup was retried until the bound
        assert!(start.elapsed() >= Duration::from_secs(9));
    }

    #[tokio::test]
    async fn test_resolve_image() {
        let repo = repository();
        let cancel = CancellationToken::new();
        let image = repo.resolve_image("Ubuntu 22.04", &cancel).await.unwrap();
        assert_eq!(image.id, "img-ubuntu-2204");
    }
}
