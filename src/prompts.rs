use crate::modes::PromptFormat;

pub const SYSTEM_PERSONA: &str = "You are an expert visual prompt engineer. \
Your goal is to create high-quality, precise image generation prompts. \
You prioritize specific named entities (characters, places) and user instructions above all else.";

pub const DEFAULT_VARIANT_COUNT: usize = 5;
pub const MAX_VARIANT_COUNT: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantOptions {
    pub format: PromptFormat,
    pub count: usize,
    pub instruction: Option<String>,
    pub style: Option<String>,
}

impl VariantOptions {
    pub fn new(format: PromptFormat) -> Self {
        Self {
            format,
            count: DEFAULT_VARIANT_COUNT,
            instruction: None,
            style: None,
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = count.clamp(1, MAX_VARIANT_COUNT);
        self
    }

    pub fn with_instruction(mut self, instruction: Option<String>) -> Self {
        self.instruction = non_blank(instruction);
        self
    }

    pub fn with_style(mut self, style: Option<String>) -> Self {
        self.style = non_blank(style);
        self
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn format_rules(format: PromptFormat) -> &'static str {
    match format {
        PromptFormat::CircularPortrait => {
            "- FORMAT: Circular Profile Picture.\n\
             - CRITICAL: Subject centered. Outside circle must be solid black.\n"
        }
        PromptFormat::TallWallpaper => {
            "- FORMAT: 9:16 Vertical Mobile Wallpaper.\n\
             - COMPOSITION: Tall, full-frame vertical shot.\n"
        }
    }
}

/// Builds the user-turn instruction sent alongside the reference image.
pub fn build_instruction(options: &VariantOptions) -> String {
    let mut user_context = String::new();
    match &options.instruction {
        Some(instruction) => {
            user_context.push_str(&format!("USER INSTRUCTION (PRIORITY #1): {instruction}\n"))
        }
        None => user_context.push_str("USER INSTRUCTION: None. rely on image analysis.\n"),
    }
    match &options.style {
        Some(style) => user_context.push_str(&format!("REQUIRED ART STYLE: {style}\n")),
        None => user_context.push_str(
            "REQUIRED ART STYLE: DIVERSE (Generate a distinct art style for each variant).\n",
        ),
    }

    let count = options.count;
    let example = (1..=count)
        .map(|n| format!(r#"{{"variant": {n}, "category": "category_name", "prompt": "..."}}"#))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "Step 1: IDENTIFY the specific character, celebrity, or subject. \
         Look for anime characters or public figures. \
         You MUST use the exact name and source material in every prompt.\n\n\
         Step 2: INTERNALIZE the User Instructions:\n\
         {user_context}\n\
         \x20  - If the user specifies a concept or character, it overrides visual analysis.\n\
         \x20  - If the user specifies a style, ALL variants must use that style but differ in composition/pose.\n\
         \x20  - If no style is specified, every variant MUST be a completely different medium.\n\n\
         Step 3: Generate {count} variants.\n\
         \x20  - Focus strictly on the SUBJECT IDENTITY defined in Step 1 or User Input.\n\
         \x20  - Ensure the subject is the central focus.\n\n\
         Step 4: Categorize the image.\n\
         \x20  - Specify a single folder name (lowercase, no spaces, use underscores) that fits the image niche.\n\
         \x20  - Examples: 'anime_characters', 'cars', 'landscapes', 'portraits', 'fantasy', 'abstract', 'animals'.\n\n\
         Step 5: Prompt Formatting Rules:\n\
         {rules}\n\
         \x20  - STRICTLY under 40 words per prompt.\n\
         \x20  - Comma-separated descriptive tags only.\n\
         \x20  - No explanations.\n\n\
         Return ONLY valid JSON:\n\
         {{\"variants\": [{example}]}}",
        rules = format_rules(options.format),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instruction_reflects_format_and_count() {
        let options = VariantOptions::new(PromptFormat::CircularPortrait).with_count(3);
        let text = build_instruction(&options);

        assert!(text.contains("Circular Profile Picture"));
        assert!(text.contains("Generate 3 variants"));
        assert!(text.contains(r#"{"variant": 3, "category""#));
        assert!(!text.contains(r#"{"variant": 4,"#));
    }

    #[test]
    fn overrides_are_included_when_present() {
        let options = VariantOptions::new(PromptFormat::TallWallpaper)
            .with_instruction(Some("make it rain".into()))
            .with_style(Some("  ".into()));
        let text = build_instruction(&options);

        assert!(text.contains("USER INSTRUCTION (PRIORITY #1): make it rain"));
        assert!(text.contains("REQUIRED ART STYLE: DIVERSE"));
        assert!(text.contains("9:16 Vertical Mobile Wallpaper"));
    }

    #[test]
    fn count_is_clamped() {
        assert_eq!(VariantOptions::new(PromptFormat::TallWallpaper).with_count(0).count, 1);
        assert_eq!(
            VariantOptions::new(PromptFormat::TallWallpaper).with_count(50).count,
            MAX_VARIANT_COUNT
        );
    }
}
