use crate::utils::print_json;
use safescale_core::Service;

pub async fn templates(service: &Service) -> anyhow::Result<()> {
    let templates = service.templates().list().await?;
    print_json(templates)
}

pub async fn images(service: &Service) -> anyhow::Result<()> {
    let images = service.templates().images().await?;
    print_json(&images)
}
