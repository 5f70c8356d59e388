//! モデル呼び出しごとのプロンプト定義。

pub(crate) const DESCRIBE_PROMPT: &str = "You are cataloguing a photographer's shoot. \
Describe this media in one short sentence: the subject, the setting, and anything notable \
about composition or lighting. Reply with the sentence only.";

pub(crate) const SAME_TAKE_PROMPT: &str = "You are sorting a photographer's shoot into takes. \
A take is a burst of shots of the same subject captured within moments of each other; small \
differences in pose, framing, exposure or focus still count as the same take. Look at the two \
images and answer with exactly one word: SAME if they belong to the same take, DIFFERENT \
otherwise.";

pub(crate) const COMPARE_IMAGES_PROMPT: &str = "You are a professional photo editor picking \
the strongest frame from a set of near-identical shots. Compare the two images on sharpness, \
exposure, composition, facial expressions and overall appeal. Respond with JSON only, no \
markdown: {\"winner\": 1 or 2, \"reasoning\": \"one sentence\", \"confidence\": 0.0-1.0}.";

pub(crate) const COMPARE_VIDEOS_PROMPT: &str = "You are a professional video editor picking \
the strongest clip from a set of takes. Compare the two clips on stability, framing, exposure \
and how well the moment lands. Respond with JSON only, no markdown: {\"winner\": 1 or 2, \
\"reasoning\": \"one sentence\", \"confidence\": 0.0-1.0}.";

pub(crate) const ENHANCE_PROMPT: &str = "Enhance this photograph like a professional retoucher: \
correct exposure and white balance, recover shadow detail, reduce noise and sharpen gently. \
Keep the content, crop and people exactly as they are. Return the enhanced image.";

/// バケット命名プロンプトを組み立てる。説明文は先頭の数件だけ使う。
pub(crate) fn name_group_prompt(labels: &[String]) -> String {
    let sample = labels
        .iter()
        .take(5)
        .map(|label| format!("- {label}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "These photos belong to one take from a shoot:\n{sample}\n\
         Give the take a short name of 2-4 words, like \"Beach sunset group\" or \
         \"Bride portrait close-up\". Reply with the name only."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_group_prompt_caps_label_count() {
        let labels: Vec<String> = (0..10).map(|i| format!("label {i}")).collect();
        let prompt = name_group_prompt(&labels);

        assert!(prompt.contains("label 0"));
        assert!(prompt.contains("label 4"));
        assert!(!prompt.contains("label 5"));
    }
}
