//! Prompt templates. Placeholders use the `<<KEY>>` form filled by
//! [`crate::utils::text::fill_template`].

pub const ALIGN_SYSTEM: &str = "You are a preprocessing agent for meeting transcripts. Clean, \
merge and structure raw transcript segments and slide captures into one timeline.\n\
Rules:\n\
1. Merge consecutive segments of the same speaker when the gap is under 3 seconds.\n\
2. Remove stutters (the same word repeated back to back).\n\
3. Trim whitespace and fix obvious encoding artifacts.\n\
4. For each timeline row attach the nearest capture text within 60 seconds as slide_context.\n\
Output only valid JSON, no commentary and no markdown fences.";

pub const ALIGN_USER: &str = "Process and merge the following meeting data.\n\n\
TRANSCRIPT SEGMENTS:\n<<TRANSCRIPT>>\n\n\
NEARBY SLIDE CAPTURES:\n<<CAPTURES>>\n\n\
MEETING CONFIG:\n<<MEETING_CONFIG>>\n\n\
Return exactly this JSON structure:\n\
{\"meeting_meta\": {\"title\": \"\", \"date\": \"\", \"time_range\": \"\", \"platform\": \"\", \
\"company\": \"\", \"chairperson\": \"\", \"attendees\": [{\"name\": \"\", \"department\": \"\", \
\"type\": \"main|supplementary\"}]},\n\
 \"timeline\": [{\"timestamp_sec\": 0.0, \"timestamp_hms\": \"HH:MM:SS\", \"speaker\": \"\", \
\"text\": \"\", \"slide_context\": null}],\n\
 \"slides\": [{\"timestamp_hms\": \"HH:MM:SS\", \"image_path\": \"\", \"ocr_text\": \"\", \
\"has_table\": false, \"has_figure\": false, \"title\": \"\"}]}";

pub const KNOWLEDGE_SYSTEM: &str = "You are a knowledge graph construction agent for company \
meetings. Extract entities, topics, decisions and action items. Missing a decision or an action \
item is a critical failure. Output only valid JSON.";

pub const KNOWLEDGE_USER: &str = "Build a knowledge graph from this preprocessed meeting data.\n\n\
DATA:\n<<DATA>>\n\n\
Entities: people (name, role, department), projects, equipment, financials (every number with \
its context), issues, decisions, action_items (task, owner, deadline).\n\
Topics: group the conversation into logical sections with start and end timestamps, key \
speakers, 3 to 5 summary points and the timestamps of related slides.\n\n\
Return:\n\
{\"entities\": {\"people\": [], \"projects\": [], \"equipment\": [], \"financials\": [], \
\"issues\": [], \"decisions\": [], \"action_items\": []},\n\
 \"topics\": [{\"id\": \"T001\", \"name\": \"\", \"department\": \"\", \
\"start_timestamp\": \"HH:MM:SS\", \"end_timestamp\": \"HH:MM:SS\", \"duration_minutes\": 0, \
\"key_speakers\": [], \"slide_timestamps\": [], \"summary_points\": [], \"issues\": [], \
\"decisions\": [], \"action_items\": []}]}";

pub const KNOWLEDGE_REDUCE_SYSTEM: &str = "You merge partial meeting knowledge graphs into one. \
Deduplicate while preserving every distinct decision and action item. Output only valid JSON.";

pub const KNOWLEDGE_REDUCE_USER: &str = "Merge these partial knowledge graphs into one canonical \
graph.\n\nPARTIAL GRAPHS:\n<<PARTIALS>>\n\n\
Rules:\n\
- Keep every unique decision and action item.\n\
- Merge duplicate entities.\n\
- Renumber ids in sequence: I001, D001, A001, T001.\n\
- Every topic needs valid start and end timestamps and duration_minutes.\n\
- Keep the schema of the partial graphs.";

pub const AGENDA_SYSTEM: &str = "You map a predefined meeting agenda onto the topics that were \
actually discussed. Use timestamps and the similarity hints, never invent agenda items. Output \
only valid JSON.";

pub const AGENDA_USER: &str = "Map each agenda line to the discussed topics.\n\n\
AGENDA:\n<<AGENDA>>\n\n\
TOPICS:\n<<TOPICS>>\n\n\
HINTS (per agenda line: most similar topic, topics sharing keywords, timestamps where the \
line's keywords were spoken):\n<<HINTS>>\n\n\
Return:\n\
{\"agenda_mapping\": [{\"agenda_number\": \"1\", \"agenda_title\": \"\", \
\"agenda_department\": \"\", \"mapped_topics\": [\"T001\"], \
\"status\": \"discussed|skipped|brief\", \"time_range\": {\"start\": \"HH:MM:SS\", \
\"end\": \"HH:MM:SS\"}, \"key_speaker\": \"\"}],\n\
 \"coverage_stats\": {\"total\": 0, \"discussed\": 0, \"skipped\": 0}}";

pub const DISCOVERY_SYSTEM: &str = "You infer the agenda of a meeting that had none. Derive \
coherent, non-overlapping topics in chronological order. Output only valid JSON.";

pub const DISCOVERY_USER: &str = "Infer the topic structure of this meeting.\n\n\
KNOWLEDGE GRAPH:\n<<KNOWLEDGE>>\n\n\
TIMELINE SAMPLE:\n<<TIMELINE>>\n\n\
Return:\n\
{\"extracted_topics\": [{\"id\": \"T001\", \"number\": \"1\", \"title\": \"\", \
\"department\": \"\", \"start_timestamp\": \"HH:MM:SS\", \"end_timestamp\": \"HH:MM:SS\", \
\"key_speakers\": []}],\n\
 \"topic_flow\": [\"T001\"]}";

pub const IMAGES_SYSTEM: &str = "You are an image intelligence agent for meeting reports. \
Classify slide captures, match them to topics, rank their importance and caption them. Output \
only valid JSON.";

pub const IMAGES_USER: &str = "Analyze these slide captures.\n\n\
CAPTURES:\n<<CAPTURES>>\n\n\
TOPICS:\n<<TOPICS>>\n\n\
For each capture:\n\
1. Skip it when ocr_skipped_reason is set or the text only lists participant names.\n\
2. content_type: DATA_TABLE (a <table> with data), PHOTO (<figure> with a photograph), CHART \
(<figure> describing a graph), DOCUMENT (a PDF or PowerPoint window), SLIDE_TEXT (bullets and \
headings), ZOOM_SCREEN (the participant grid).\n\
3. content_summary: one line describing the content.\n\
4. Topic: the topic whose time range holds timestamp_sec, else the best keyword match.\n\
5. Special patterns: BEFORE_AFTER for two photos of the same subject within 5 minutes, \
DATA_SERIES for consecutive tables with the same header.\n\
6. caption: one or two formal sentences.\n\
7. insertion_priority 1 to 5 (5: key figures, defect photos; 1: duplicates or blanks).\n\
8. render_as: html_table, photo_lightbox, chart_embed, document_ref, before_after or \
slide_text.\n\n\
Return:\n\
{\"image_manifest\": [{\"capture_index\": 1, \"timestamp_hms\": \"HH:MM:SS\", \
\"timestamp_sec\": 0, \"image_path\": \"\", \"content_type\": \"SLIDE_TEXT\", \
\"content_summary\": \"\", \"topic_id\": \"\", \"topic_name\": \"\", \
\"insertion_priority\": 2, \"caption\": \"\", \"special_pattern\": null, \
\"pair_index\": null, \"render_as\": \"slide_text\", \"table_html\": \"\", \
\"ocr_file_size_bytes\": 0}],\n\
 \"statistics\": {\"total\": 0, \"filtered\": 0, \"by_type\": {}, \
\"before_after_pairs\": [], \"data_series\": []}}";

pub const IMAGES_REDUCE_SYSTEM: &str = "You merge partial image manifests. Keep one entry per \
capture_index, preferring the higher insertion_priority. Output only valid JSON.";

pub const IMAGES_REDUCE_USER: &str = "Merge these partial image analysis outputs into one.\n\n\
PARTIALS:\n<<PARTIALS>>\n\n\
Sum the statistics counters, deduplicate before_after_pairs and data_series, and keep the \
schema {\"image_manifest\": [...], \"statistics\": {...}}.";

pub const TOPIC_SUMMARY_SYSTEM: &str = "You write formal meeting minutes.\n\
The TIMELINE SNIPPET is the primary source for the topic; the knowledge graph is supplementary \
and anything it holds that the snippet does not must be left out. Stay strictly within the \
topic's title and time range. Preserve concrete numbers, budgets, percentages, project names \
and people. Write prose paragraphs without bullet points and attribute every decision. Output \
only valid JSON.";

pub const TOPIC_SUMMARY_USER: &str = "Summarize ONE meeting topic.\n\n\
KNOWLEDGE GRAPH:\n<<KNOWLEDGE>>\n\n\
TOPIC ITEM:\n<<TOPIC_ITEM>>\n\n\
TIMELINE SNIPPET:\n<<TIMELINE_SNIPPET>>\n\n\
SLIDES:\n<<SLIDES>>\n\n\
Return:\n\
{\"topic_summary\": {\"topic_id\": \"\", \"agenda_number\": \"\", \"title\": \"\", \
\"department\": \"\", \"presenter\": \"\", \"time_range\": \"HH:MM:SS – HH:MM:SS\", \
\"status\": \"discussed\", \"summary\": \"\", \
\"key_data_points\": [{\"label\": \"\", \"value\": \"\", \"unit\": \"\"}], \
\"decisions\": [], \"action_items\": [{\"task\": \"\", \"owner\": \"\", \"deadline\": \"\"}], \
\"slide_count\": 0}}";

pub const EXECUTIVE_SYSTEM: &str = "You write the executive summary of formal meeting minutes.\n\
Work only from the topic summaries and the knowledge graph you are given, covering the whole \
meeting from first topic to last. Lead with the outcomes: decisions taken, money and numbers \
agreed, and who owns the follow-up work. Count decisions and action items across all topics. \
Write prose paragraphs without bullet points. Output only valid JSON.";

pub const EXECUTIVE_USER: &str = "Write the executive summary of the whole meeting.\n\n\
TOPIC SUMMARIES:\n<<TOPIC_SUMMARIES>>\n\n\
KNOWLEDGE GRAPH:\n<<KNOWLEDGE>>\n\n\
Return:\n\
{\"executive_summary\": \"\", \"total_decisions\": 0, \"total_action_items\": 0, \
\"meeting_duration\": \"H:MM:SS\"}";

pub const RENDER_SYSTEM: &str = "You generate a complete, self-contained HTML meeting report.\n\
- All CSS inside <style>, all script inside <script>, images as given.\n\
- Printable on A4.\n\
- Use only data from META, SUMMARIES, KNOWLEDGE and IMAGES_BY_TOPIC. Never invent people, \
agenda items, dates or numbers.\n\
- Keep agenda numbers, titles, departments and time ranges exactly as provided.\n\
- Write \"No data\" where data is missing.\n\
Output only the raw HTML document, no commentary and no fences.";

pub const RENDER_USER: &str = "Render the meeting report.\n\n\
META:\n<<META>>\n\n\
SUMMARIES:\n<<SUMMARIES>>\n\n\
KNOWLEDGE:\n<<KNOWLEDGE>>\n\n\
IMAGES_BY_TOPIC:\n<<IMAGES>>\n\n\
Section headings must appear in this order: <<MARKERS>>.\n\
Layout: <<LAYOUT>>.\n\
Include this style and script bundle verbatim inside <head>:\n<<BUNDLE>>";
