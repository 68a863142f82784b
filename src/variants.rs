use crate::{
    error::ServiceError,
    parser::{self, VariantList},
    prompts::{VariantOptions, build_instruction},
    vision::VisionClient,
};

/// Asks the vision model for prompt variants describing `image`.
///
/// Content wins over a refusal when both are present. With neither, the
/// finish reason is reported as `NoContent`.
pub async fn generate_variants(
    client: &dyn VisionClient,
    image: &[u8],
    options: &VariantOptions,
) -> Result<VariantList, ServiceError> {
    let instruction = build_instruction(options);
    let completion = client.complete(image, &instruction).await?;

    let variants = match (completion.content, completion.refusal) {
        (Some(content), _) => parser::parse(content)?,
        (None, Some(refusal)) => return Err(ServiceError::ModelRefusal(refusal)),
        (None, None) => return Err(ServiceError::NoContent(completion.finish_reason)),
    };

    if variants.len() != options.count {
        tracing::warn!(
            requested = options.count,
            received = variants.len(),
            "model returned a different number of variants"
        );
    }

    Ok(variants)
}
