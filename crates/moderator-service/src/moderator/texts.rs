//! Moderator announcement texts. Every sentence ends with a newline so
//! consecutive sentences can be concatenated.

pub const PRESENTATION_FINISHED: &str = "Thank you for your presentation.\n";

pub const ANSWER_FINISHED: &str = "Thank you for your answer.\n";

pub const MEETING_ENDED: &str = "This concludes the meeting. Thank you, everyone.\n";

pub fn next_questioner(name: &str) -> String {
    format!("Next, {name}, please go ahead with your question.\n")
}

pub fn written_question(page: i32, body: &str) -> String {
    format!("Here is an anonymous question about page {page}: {body}\n")
}

pub fn escalation(page: i32) -> String {
    format!("Many participants seem puzzled by page {page}. Could you explain it in more detail?\n")
}

pub fn rotation(presenter: &str, next: &str) -> String {
    format!("That concludes {presenter}'s presentation. The next presenter is {next}.\n")
}

pub fn meeting_start(first_presenter: &str) -> String {
    format!("The meeting is starting now. The first presenter is {first_presenter}.\n")
}
