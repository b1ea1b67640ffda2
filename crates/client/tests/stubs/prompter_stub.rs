use std::{collections::VecDeque, sync::Mutex};

use solkit_client::Prompter;

/// Gives scripted answers and remembers every question. Once the script
/// runs out every confirmation is declined.
#[derive(Default, Debug)]
pub struct PrompterStub {
    answers: Mutex<VecDeque<bool>>,
    questions: Mutex<Vec<String>>,
}

#[allow(unused)] // used in tests
impl PrompterStub {
    pub fn answering(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            questions: Mutex::default(),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.questions.lock().unwrap().clone()
    }
}

impl Prompter for PrompterStub {
    fn confirm(&self, question: &str, _default: bool) -> bool {
        self.questions.lock().unwrap().push(question.to_owned());
        self.answers.lock().unwrap().pop_front().unwrap_or(false)
    }

    fn select(&self, question: &str, _options: &[String]) -> Option<usize> {
        self.questions.lock().unwrap().push(question.to_owned());
        None
    }
}
