//! Chat templates: how a message list is laid out for a given model family.
//!
//! Every template ends with the assistant header (a generation prompt) so the
//! model continues as the assistant.

use parley_core::message::{Message, Role};

/// Chat template format used to structure messages for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatTemplate {
    /// `<|system|>\n{content}</s>\n<|user|>\n{content}</s>\n<|assistant|>\n`
    TinyLlama,
    /// `<|im_start|>system\n{content}<|im_end|>\n<|im_start|>assistant\n`
    ChatML,
    /// `[INST] <<SYS>>\n{system}\n<</SYS>>\n\n{content} [/INST]`
    Llama2,
    /// `<|begin_of_text|><|start_header_id|>system<|end_header_id|>\n\n{content}<|eot_id|>`
    Llama3,
}

impl ChatTemplate {
    /// Format messages with a trailing generation prompt.
    pub fn render(&self, messages: &[Message]) -> String {
        match self {
            Self::TinyLlama => format_tinyllama(messages),
            Self::ChatML => format_chatml(messages),
            Self::Llama2 => format_llama2(messages),
            Self::Llama3 => format_llama3(messages),
        }
    }

    /// Special tokens that mark the end of an assistant turn.
    pub fn end_of_turn_tokens(&self) -> &'static [&'static str] {
        match self {
            Self::TinyLlama | Self::Llama2 => &["</s>"],
            Self::ChatML => &["<|im_end|>", "<|endoftext|>"],
            Self::Llama3 => &["<|eot_id|>", "<|end_of_text|>"],
        }
    }
}

fn format_tinyllama(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        let header = match msg.role {
            Role::System => "<|system|>\n",
            Role::User => "<|user|>\n",
            Role::Assistant => "<|assistant|>\n",
        };
        prompt.push_str(header);
        prompt.push_str(&msg.content);
        prompt.push_str("</s>\n");
    }
    prompt.push_str("<|assistant|>\n");
    prompt
}

fn format_chatml(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for msg in messages {
        prompt.push_str("<|im_start|>");
        prompt.push_str(msg.role.as_str());
        prompt.push('\n');
        prompt.push_str(&msg.content);
        prompt.push_str("<|im_end|>\n");
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_llama2(messages: &[Message]) -> String {
    let mut prompt = String::new();
    let mut system_prompt = String::new();

    for msg in messages {
        match msg.role {
            Role::System => {
                system_prompt = msg.content.clone();
            }
            Role::User => {
                prompt.push_str("[INST] ");
                if !system_prompt.is_empty() {
                    prompt.push_str("<<SYS>>\n");
                    prompt.push_str(&system_prompt);
                    prompt.push_str("\n<</SYS>>\n\n");
                    system_prompt.clear();
                }
                prompt.push_str(&msg.content);
                prompt.push_str(" [/INST]");
            }
            Role::Assistant => {
                prompt.push(' ');
                prompt.push_str(&msg.content);
                prompt.push_str(" </s>");
            }
        }
    }
    prompt
}

fn format_llama3(messages: &[Message]) -> String {
    let mut prompt = String::from("<|begin_of_text|>");
    for msg in messages {
        prompt.push_str("<|start_header_id|>");
        prompt.push_str(msg.role.as_str());
        prompt.push_str("<|end_header_id|>\n\n");
        prompt.push_str(&msg.content);
        prompt.push_str("<|eot_id|>");
    }
    prompt.push_str("<|start_header_id|>assistant<|end_header_id|>\n\n");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("You are helpful."),
            Message::user("Hello!"),
            Message::assistant("Hi."),
            Message::user("Again"),
        ]
    }

    #[test]
    fn tinyllama_layout() {
        let prompt = ChatTemplate::TinyLlama.render(&conversation());
        assert!(prompt.starts_with("<|system|>\nYou are helpful.</s>\n<|user|>\nHello!</s>\n"));
        assert!(prompt.contains("<|assistant|>\nHi.</s>\n"));
        assert!(prompt.ends_with("<|user|>\nAgain</s>\n<|assistant|>\n"));
    }

    #[test]
    fn chatml_layout() {
        let prompt = ChatTemplate::ChatML.render(&conversation()[..2]);
        assert_eq!(
            prompt,
            "<|im_start|>system\nYou are helpful.<|im_end|>\n\
             <|im_start|>user\nHello!<|im_end|>\n\
             <|im_start|>assistant\n"
        );
    }

    #[test]
    fn llama2_folds_system_into_first_instruction() {
        let prompt = ChatTemplate::Llama2.render(&conversation());
        assert!(prompt.starts_with("[INST] <<SYS>>\nYou are helpful.\n<</SYS>>\n\nHello! [/INST]"));
        assert!(prompt.contains(" Hi. </s>[INST] Again [/INST]"));
        assert_eq!(prompt.matches("<<SYS>>").count(), 1);
    }

    #[test]
    fn llama3_layout() {
        let prompt = ChatTemplate::Llama3.render(&[Message::user("Hello")]);
        assert!(prompt.starts_with("<|begin_of_text|>"));
        assert!(prompt.contains("<|start_header_id|>user<|end_header_id|>\n\nHello<|eot_id|>"));
        assert!(prompt.ends_with("<|start_header_id|>assistant<|end_header_id|>\n\n"));
    }

    #[test]
    fn end_of_turn_tokens_per_family() {
        assert_eq!(ChatTemplate::TinyLlama.end_of_turn_tokens(), &["</s>"]);
        assert!(ChatTemplate::ChatML.end_of_turn_tokens().contains(&"<|im_end|>"));
    }
}
