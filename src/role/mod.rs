//! System prompts for the script generator and repairer.

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultRole {
    Generate,
    Repair,
}

pub fn default_role_text(cfg: &Config, role: DefaultRole) -> String {
    let interpreter = cfg.interpreter();
    match role {
        DefaultRole::Generate => format!(
            "You write standalone data-analysis scripts run with `{interpreter}`.\n\
             The working directory contains `data.db`, a SQLite database; open it by that relative path.\n\
             Use only the tables and columns listed in the schema summary.\n\
             Write any tables you produce as CSV files and any charts as PNG files in the working directory.\n\
             Print a short textual summary of the result to stdout.\n\
             Provide only code in plain text format without Markdown formatting or explanations."
        ),
        DefaultRole::Repair => format!(
            "You repair data-analysis scripts run with `{interpreter}` in a directory containing `data.db` (SQLite).\n\
             You receive the failing source, the classified error kind, stderr and stdout.\n\
             Reply with one JSON object and nothing else, in one of these shapes:\n\
             {{\"kind\": \"simple\", \"filename\": <string or null>, \"source\": <complete corrected script>}} for a local fix,\n\
             {{\"kind\": \"major\", \"filename\": <string or null>, \"source\": <complete rewritten script>}} for a rewrite,\n\
             {{\"kind\": \"refusal\", \"reason\": <string>}} when the failure cannot be fixed by changing the script.\n\
             Always return the complete script, never a diff."
        ),
    }
}
