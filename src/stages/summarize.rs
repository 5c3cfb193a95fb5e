//! Summarize: prompt construction and time-coded deep links.
//!
//! The model call itself lives behind the `Summarizer` adapter; this module
//! only decides what to ask for.

use crate::domain::Episode;

/// Chat messages for one summary request
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryPrompt {
    pub system: String,
    pub user: String,
}

/// Deep link into the episode at `seconds`, e.g. `{link}?t=1h2m0s`.
///
/// Leading zero units are omitted (`?t=56s`, `?t=25m55s`), matching the
/// format podcast players accept.
pub fn timestamp_link(link: &str, seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let offset = if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, secs)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, secs)
    } else {
        format!("{}s", secs)
    };

    let separator = if link.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", link, separator, offset)
}

/// Build the summary request for an episode's filtered transcript
pub fn build_prompt(episode: &Episode, transcript: &str, hosts: &[String]) -> SummaryPrompt {
    let example_link = "https://link.to.episode/abc123";
    let host_names = join_names(hosts);

    let hosts_rule = if host_names.is_empty() {
        String::new()
    } else {
        format!(
            "Never say \"the hosts\", always use the names of the hosts, which are {}.\n",
            host_names
        )
    };

    let system = format!(
        "You are a helpful assistant that helps listeners understand the podcast episode, in an actionable way.\n\
         You will be provided with a transcript of the episode, which will contain timestamps for each segment. Here's an example:\n\
         \n\
         ```\n\
         [00:00:00] This is the first segment\n\
         [00:01:00] This is the second segment\n\
         ```\n\
         \n\
         You must include these timestamps to reference specific parts of the transcript (with a timestamped link to the episode) in your response. For example:\n\
         \n\
         ```\n\
         - **Bullet point**: Some example of a bullet point. [¹]({a}) [²]({b}) [³]({c})\n\
         - **Another bullet point**: More exampling. [¹]({a}) [²]({b})\n\
         ```\n\
         \n\
         Make sure you're not repeating information in your response.\n\
         {hosts_rule}\
         Never include a closing note in your response.\n",
        a = timestamp_link(example_link, 25 * 60 + 55),
        b = timestamp_link(example_link, 56),
        c = timestamp_link(example_link, 3600 + 2 * 60),
        hosts_rule = hosts_rule,
    );

    let user = format!(
        "You should provide:\n\
         1. A thorough summary of the episode.\n\
         2. If there are research backed concepts that get emphasized in the episode that seemed particularly impactful, include them. Be selective to the most important ones.\n\
         3. A cheat sheet to help listeners understand the episode and apply the learnings to their own lives.\n\
         \n\
         If it's a reflections episode (one where listeners send questions), also include a section for all the questions and answers.\n\
         Don't oversimplify either the questions or the answers.\n\
         Make sure to include the short and the long questions in the order in which they are asked in the transcript.\n\
         \n\
         The cheat sheet should be concise and to the point, and should be formatted as a list of bullet points.\n\
         Don't include the episode title in your response.\n\
         \n\
         Here's the link to the episode:\n\
         {link}\n\
         \n\
         Here is the transcript:\n\
         \n\
         ```\n\
         {transcript}\n\
         ```\n",
        link = episode.link,
        transcript = transcript,
    );

    SummaryPrompt { system, user }
}

/// "Nick", "Nick and Billy", "Ann, Bob and Cy"
fn join_names(names: &[String]) -> String {
    let names: Vec<&str> = names
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .collect();

    match names.split_last() {
        None => String::new(),
        Some((last, [])) => last.to_string(),
        Some((last, rest)) => format!("{} and {}", rest.join(", "), last),
    }
}
