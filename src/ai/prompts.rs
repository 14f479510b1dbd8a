/// System prompt for file classification
pub const CLASSIFY_SYSTEM_PROMPT: &str = "Return only valid JSON (no markdown), with keys: category_path, suggested_filename, confidence (0-1).";

/// System prompt for category consolidation
pub const OPTIMIZE_SYSTEM_PROMPT: &str = "You consolidate folder structures. Return only valid JSON (no markdown), with key: optimizations.";

/// Broad first-level categories offered to the model
const TOP_LEVEL_CATEGORIES: &str = "Business, Personal, Finance, Health, Education, Entertainment, Work, Travel, Legal, Technology, Science, Art, Music, Sports, Media, Documents, Archives";

/// Sample filenames listed per category in the optimization prompt
pub const OPTIMIZE_SAMPLE_SIZE: usize = 8;

/// Build user prompt for classifying one file
pub fn build_classification_prompt(
    original_filename: &str,
    text: Option<&str>,
    is_image: bool,
    max_text_length: usize,
    category_hints: &[String],
) -> String {
    let subject = if is_image { "image" } else { "text content" };

    let mut prompt = format!(
        r#"You are a file organizer. Analyze the {subject} and provide classification and naming suggestions.

TASK 1 - CATEGORY
- Category path with EXACTLY 2 levels separated by "/" in Title Case (e.g. "Personal/Medical Records")
- First level must be one of: {TOP_LEVEL_CATEGORIES}
- Second level is a specific subcategory (Invoices, Reports, Photos, Recipes, Projects, Research, Contracts, Receipts, Presentations, Notes, ...)
- If nothing fits clearly, use "Uncategorized/General"

TASK 2 - FILENAME
- Descriptive base name WITHOUT extension, lowercase with underscores
- Format: primary_topic_entity_date (omit missing parts, keep at least primary_topic)
- Dates as YYYY-MM-DD; keep it under 50 characters
- Examples: invoice_acme_corp_2024-03-15, recipe_chocolate_cake, contract_freelance_2024"#
    );

    if is_image {
        prompt.push_str(
            "\n\nFor images: describe visible content, text, objects or documents to decide the category and filename.",
        );
    }

    if !category_hints.is_empty() {
        prompt.push_str(&format!(
            "\n\nEXISTING CATEGORIES (reuse one when it fits):\n{}",
            category_hints.join("\n")
        ));
    }

    prompt.push_str(
        r#"

OUTPUT: return ONLY JSON with these exact keys:
{"category_path": "Category/Subcategory", "suggested_filename": "descriptive_name_here", "confidence": 0.85}"#,
    );

    prompt.push_str(&format!("\n\nORIGINAL FILENAME: {}", original_filename));

    if is_image {
        prompt.push_str("\n\n[Image attached]");
    } else if let Some(text) = text.filter(|t| !t.trim().is_empty()) {
        let truncated = truncate_chars(text, max_text_length);
        prompt.push_str(&format!(
            "\n\nCONTENT (truncated to {} chars):\n---\n{}\n---",
            max_text_length, truncated
        ));
    }

    prompt
}

/// Build user prompt for consolidating the category tree
pub fn build_optimization_prompt(tree: &[(String, Vec<String>, usize)]) -> String {
    let mut prompt = String::from(
        "Review these file categories and suggest merges or renames that make the structure \
         cleaner: merge near-duplicates (e.g. \"Finance/Invoice\" and \"Finance/Invoices\"), fix \
         inconsistent casing, and move stray categories under a better parent. Only suggest changes \
         that clearly help; an empty list is fine.\n\nCATEGORIES:\n",
    );

    for (category, samples, count) in tree {
        prompt.push_str(&format!("- {} ({} files)", category, count));
        if !samples.is_empty() {
            prompt.push_str(&format!(": {}", samples.join(", ")));
            if *count > samples.len() {
                prompt.push_str(", ...");
            }
        }
        prompt.push('\n');
    }

    prompt.push_str(
        r#"
OUTPUT: return ONLY JSON:
{"optimizations": [{"from": "existing/category", "to": "better/category", "reason": "short reason"}]}
"from" must be one of the categories listed above, exactly as written."#,
    );

    prompt
}

/// Truncate on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
