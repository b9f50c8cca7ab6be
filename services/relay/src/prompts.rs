//! Instruction templates sent to the generative model.

use crate::wardrobe::WardrobeItem;
use serde_json::Value;

/// Reply for users whose closet is still empty
pub const EMPTY_CLOSET_MESSAGE: &str = "옷장에 아이템을 먼저 추가해주세요!";

/// Item fields worth showing the model, in display order
const DESCRIPTIVE_FIELDS: &[&str] = &[
    "name", "category", "color", "brand", "material", "season", "style", "description",
];

/// Virtual try-on instruction for one person image followed by `overlay_count` clothing images
pub fn try_on_instruction(overlay_count: usize) -> String {
    let clothing = if overlay_count <= 1 {
        "the second image of the clothing".to_string()
    } else {
        format!("the following {overlay_count} images of clothing items")
    };

    format!(
        "You are an expert virtual try-on AI.\n\
         Using the first image of the person and {clothing}, generate a new image where the person is wearing {wearing}.\n\
         Maintain the person's original face, hair, and body shape. The clothing should fit naturally.\n\
         Preserve the background of the first image.\n\
         The output must be only the resulting image.",
        wearing = if overlay_count <= 1 { "the clothing" } else { "all of these items together as one outfit" },
    )
}

/// Style recommendation instruction, followed by the user's most recent items
pub fn recommendation_instruction(items: &[WardrobeItem]) -> String {
    let mut prompt = String::from(
        "당신은 전문 패션 스타일리스트입니다.\n\
         아래는 사용자의 옷장에 최근 추가된 아이템 목록입니다.\n\
         이 아이템들을 활용해 오늘 입기 좋은 코디를 하나 추천하고, 그 이유를 두세 문장으로 친근하게 설명해주세요.\n\
         목록에 없는 아이템이 필요하다면 어울리는 아이템을 한 가지만 제안해주세요.\n\n\
         옷장 아이템:\n",
    );

    for (index, item) in items.iter().enumerate() {
        prompt.push_str(&format!("{}. {}\n", index + 1, describe_item(item)));
    }

    prompt
}

/// One-line summary of an item's descriptive fields
fn describe_item(item: &WardrobeItem) -> String {
    let details: Vec<String> = DESCRIPTIVE_FIELDS
        .iter()
        .filter_map(|key| {
            let rendered = match item.fields.get(*key)? {
                Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                Value::Array(values) => values
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("/"),
                _ => return None,
            };
            (!rendered.is_empty()).then(|| format!("{key}: {rendered}"))
        })
        .collect();

    if details.is_empty() {
        format!("아이템 {}", item.id)
    } else {
        details.join(", ")
    }
}
