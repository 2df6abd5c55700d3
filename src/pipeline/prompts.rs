//! Prompt construction for Analyze, Rewrite and Chat.

use crate::pipeline::types::{Analysis, Platform};

/// Cap on source text sent to a single call.
const MAX_SOURCE_CHARS: usize = 60_000;

// ── Analyze ─────────────────────────────────────────────────────────

pub fn analyze_system_prompt() -> String {
    "You are a content strategist who judges raw ideas and conversation transcripts \
     for their publishing potential. Calibration matters more than flattery: the scores \
     you give decide what gets written.\n\n\
     Output rules:\n\
     - Return ONLY one JSON object. No markdown fences, no explanation.\n\
     - novelty_score and clarity_score are integers from 0 to 10.\n\
     - publishable is a JSON boolean."
        .to_string()
}

pub fn analyze_user_prompt(source_text: &str) -> String {
    let mut prompt = String::with_capacity(source_text.len() + 2048);
    prompt.push_str(
        "Analyze the content below. Return a JSON object with these fields:\n\n\
         \"idea_type\": one of \"opinion\" (a point of view being argued), \"analysis\" \
         (reasoning about a trend, event or data), \"essay\" (reflective long-form), \
         \"tutorial\" (practical steps), \"story\" (personal narrative with a point), \
         \"thread\" (connected short points), \"news\" (commentary on a current event).\n\n\
         \"novelty_score\": how fresh the idea is. 1-2 conventional wisdom; 3-4 common take; \
         5-6 familiar topic with a personal angle; 7-8 counterintuitive or underexplored; \
         9-10 genuinely new framework or research.\n\n\
         \"clarity_score\": the raw material as written. 1-2 incoherent; 3-4 idea buried; \
         5-6 present but underargued; 7-8 clear thesis and flow; 9-10 exceptionally articulated.\n\n\
         \"publishable\": true if there is a thesis and enough substance to post after light \
         editing; false for stream of consciousness, unsupported claims or private material.\n\n\
         \"risk_level\": \"low\" (personal opinion, education, creative work), \"medium\" \
         (criticism of named companies or people, politics, general health or money talk), \
         \"high\" (possibly defamatory claims, actionable legal, medical or financial advice).\n\n\
         \"summary\": the core thesis as one declarative sentence, at most 150 characters.\n\n\
         \"key_points\": 3-5 complete sentences, each one specific claim or piece of evidence.\n\n\
         \"platform_assessments\": an array with one object for each of \"x\", \"medium\", \
         \"substack\", \"reddit\". Each object has \"platform\", \"novelty_score\", \
         \"clarity_score\", \"publishable\", \"risk_level\", \"summary\" (platform angle, at \
         most 120 characters), \"key_points\" (2-4 strings) and \"reason\" (at most 80 \
         characters). Judge each platform on its own; when unsure, mark it not publishable.\n\n\
         The top-level fields are the overall verdict.\n\n\
         Content:\n---\n",
    );
    prompt.push_str(&truncate_chars(source_text, MAX_SOURCE_CHARS));
    prompt.push_str("\n---\n\nReturn only the JSON object.");
    prompt
}

// ── Rewrite ─────────────────────────────────────────────────────────

pub fn rewrite_system_prompt() -> String {
    "You are an expert writer who adapts ideas for specific publishing platforms. \
     Write in the voice of a thoughtful, knowledgeable person. Be direct and useful. \
     The platform rules you are given are compliance requirements that decide real-world \
     distribution, not style suggestions. Output only the finished piece."
        .to_string()
}

/// Format, distribution and prohibition rules for one platform.
pub fn platform_instructions(platform: Platform) -> &'static str {
    match platform {
        Platform::X => {
            "Write a post or thread for X.\n\n\
             FORMAT\n\
             - A single post is at most 280 characters.\n\
             - A thread is 3-8 posts separated by a line containing only \"---\". The first \
             post must stand alone as the hook.\n\
             - Prefer a thread when there are three or more distinct points.\n\n\
             DISTRIBUTION\n\
             - Aim for reposts and bookmarks: strong hooks, surprising facts, clear takeaways.\n\
             - Spell correctly. Keep external links out of the first post.\n\n\
             PROHIBITED\n\
             - More than one hashtag, or generic hashtags.\n\
             - Engagement bait (\"RT if you agree\", \"follow for more\", \"drop a 🔥\").\n\
             - A \"BREAKING:\" prefix, filler emoji, asking for follows or votes.\n\n\
             STYLE\n\
             - Direct and specific, first person where natural, one idea per post."
        }
        Platform::Medium => {
            "Write a Medium article.\n\n\
             FORMAT\n\
             - First line: the title as plain text (no # prefix, no trailing punctuation).\n\
             - Second line blank, then the body.\n\
             - 600-1500 words with ## subheadings.\n\
             - End with a concrete takeaway, not a request to follow or clap.\n\n\
             CURATION\n\
             - A clear, specific point of view. Include at least one concrete example, data \
             point or personal anecdote.\n\
             - Narrative and argument over bullet dumps. A natural human voice.\n\n\
             PROHIBITED\n\
             - Clickbait titles, ALL CAPS, off-topic tags, undisclosed affiliate links.\n\
             - Unverified health claims or misinformation. A promotional sales tone."
        }
        Platform::Substack => {
            "Write a Substack newsletter post.\n\n\
             FORMAT\n\
             - First line: the email subject line. Second line blank, then the body.\n\
             - 500-1200 words.\n\
             - End with a genuine question or reflection that invites replies.\n\n\
             SUBJECT LINE\n\
             - 6-10 words, conversational, sentence case, at most one emoji at the end.\n\
             - Never use spam triggers: \"free\", \"click here\", \"buy now\", \"limited \
             time\", \"act now\", \"special offer\", ALL CAPS, repeated exclamation marks, \
             false urgency, or a subject that misrepresents the post.\n\n\
             BODY\n\
             - At most 3-5 links with descriptive anchor text.\n\
             - No sales language. Do not mention unsubscribing.\n\n\
             STYLE\n\
             - Write to one reader who already trusts you. Personal anecdotes and honest \
             opinions beat corporate polish."
        }
        Platform::Reddit => {
            "Write a Reddit post.\n\n\
             FORMAT\n\
             - First line: the title (50-80 characters ideal, never over 300).\n\
             - Second line blank, then the self-text body.\n\
             - 250-800 words with light Markdown. Open by saying why this matters to the \
             community.\n\n\
             TITLE\n\
             - Sentence case, accurate, no \"BREAKING:\", no ALL CAPS, no !!! or ???, no \
             clickbait questions.\n\n\
             PROHIBITED\n\
             - Any request for upvotes, downvotes or comments (\"upvote if you agree\").\n\
             - Self-promotion: follow or subscribe requests, affiliate links, marketing tone, \
             driving traffic elsewhere.\n\n\
             STYLE\n\
             - A community member sharing first-hand experience. Concrete examples, \
             acknowledged uncertainty, casual register, conversational paragraphs."
        }
    }
}

pub fn rewrite_user_prompt(
    source_text: &str,
    platform: Platform,
    analysis: &Analysis,
    style: Option<&str>,
) -> String {
    let key_points = analysis.key_points_for(platform);
    let key_points = if key_points.is_empty() {
        "(none extracted)".to_string()
    } else {
        key_points
            .iter()
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let style = style.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("(none)");

    format!(
        "Original content:\n---\n{source}\n---\n\n\
         Analysis summary: {summary}\n\
         Key points:\n{key_points}\n\
         User style preference: {style}\n\n\
         {instructions}\n\n\
         Write the {platform} version now:",
        source = truncate_chars(source_text, MAX_SOURCE_CHARS),
        summary = analysis.summary_for(platform),
        instructions = platform_instructions(platform),
    )
}

// ── Chat ────────────────────────────────────────────────────────────

pub fn chat_system_prompt() -> String {
    "You are a sharp thinking partner helping the user turn a raw idea into something \
     worth publishing. Help them converge rather than expand.\n\n\
     - Stay on the user's topic. Do not introduce new directions unless asked.\n\
     - Ask at most one focused question, and only when needed. Otherwise give a short \
     synthesis.\n\
     - Surface the core insight, the key assumptions and the next step. Point out gaps \
     or contradictions briefly.\n\
     - Keep replies short. This is a dialogue.\n\
     - Once the thesis, audience and main argument are clear, recommend sending /analyze \
     and do not reopen broad exploration.\n\n\
     Always reply in the language the user writes in."
        .to_string()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}\n[...]", &text[..idx]),
        None => text.to_string(),
    }
}
