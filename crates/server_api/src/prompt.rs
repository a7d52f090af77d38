//! Instruction text sent alongside the reference images.
//!
//! Reference images are positional: the first is the style reference and the
//! second is the subject reference. Aspect ratio and resolution travel as
//! generation parameters and never appear in the prose.

use shared::{domain::ChatRole, protocol::ChatTurn};

const HEADLINE: &str = "Create a highly engaging, 'viral' style YouTube thumbnail image.";

const STYLE_REQUIREMENTS: &str = "Requirements:
- High contrast, vibrant colors.
- Expressive facial expressions (if people are present).
- Clear, bold text overlays if applicable (do not produce gibberish text).
- Dynamic lighting.";

const SINGLE_REFERENCE: &str = "Use the attached image as the main subject or style reference.";

const STYLE_AND_SUBJECT: &str = "IMPORTANT: You have TWO reference images:
1. FIRST IMAGE = STYLE REFERENCE (use its composition, layout, text style, colors, background, and overall design)
2. SECOND IMAGE = SUBJECT REFERENCE (the main subject/element to feature in the thumbnail)

YOUR TASK: Create a new thumbnail that combines these intelligently:
- Take the COMPOSITION, LAYOUT, TEXT PLACEMENT, COLORS, and BACKGROUND from the first image
- If the second image contains a PERSON/FACE: Replace any person/face in the first image with the person from the second image
- If the second image contains an OBJECT/PRODUCT: Incorporate that object/product into the scene from the first image
- If the second image is a LOGO/BRAND: Add that branding element to the first image's design
- Keep the same pose, expression intensity, and energy as the first image (if applicable)
- Maintain the same text style and placement (if text exists)
- The result should seamlessly blend the subject from the second image into the scene/style from the first image";

const TEXT_ONLY: &str =
    "No reference images were provided. Generate the thumbnail from the request alone.";

pub fn compose_prompt(instruction: &str, reference_count: usize, history: &[ChatTurn]) -> String {
    let mut sections = vec![HEADLINE.to_string()];

    match reference_count {
        0 => sections.push(TEXT_ONLY.to_string()),
        1 => sections.push(SINGLE_REFERENCE.to_string()),
        _ => {
            sections.push("Use the attached images as references.".to_string());
            sections.push(STYLE_AND_SUBJECT.to_string());
        }
    }

    sections.push(STYLE_REQUIREMENTS.to_string());

    if let Some(transcript) = transcript(history) {
        sections.push(transcript);
    }

    sections.push(format!("Current User Request: {}", instruction.trim()));
    sections.join("\n\n")
}

/// Line-oriented transcript of prior turns; error-flagged model turns are dropped.
fn transcript(history: &[ChatTurn]) -> Option<String> {
    let lines: Vec<String> = history
        .iter()
        .filter_map(|turn| match turn.role {
            ChatRole::User => Some(format!("User: {}", turn.text)),
            ChatRole::Model if !turn.is_error => Some(format!("Assistant: {}", turn.text)),
            ChatRole::Model => None,
        })
        .collect();

    if lines.is_empty() {
        return None;
    }
    Some(format!("Previous conversation:\n{}", lines.join("\n")))
}
