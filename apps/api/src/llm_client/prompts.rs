// Shared prompt fragments. Each stage that calls the model defines its own prompts.rs
// alongside it and reuses these.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction appended to every rewrite prompt.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Only restate facts that are present in the text you are given. \
    Do NOT invent employers, metrics, technologies, or outcomes. \
    If a target keyword does not fit the facts, leave it out.";
