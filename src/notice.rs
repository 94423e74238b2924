//! User-visible, non-blocking notifications.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Failure(String),
}

impl Notice {
    pub fn is_failure(&self) -> bool {
        matches!(self, Notice::Failure(_))
    }

    pub fn text(&self) -> &str {
        match self {
            Notice::Success(t) | Notice::Failure(t) => t,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub notices: Mutex<Vec<Notice>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notice: Notice) {
            self.notices.lock().unwrap().push(notice);
        }
    }

    impl RecordingNotifier {
        pub fn failures(&self) -> Vec<String> {
            self.notices
                .lock()
                .unwrap()
                .iter()
                .filter_map(|n| match n {
                    Notice::Failure(t) => Some(t.clone()),
                    Notice::Success(_) => None,
                })
                .collect()
        }
    }

    #[test]
    fn notice_text() {
        assert_eq!(Notice::Failure("boom".into()).text(), "boom");
        let rec = RecordingNotifier::default();
        rec.notify(Notice::Success("ok".into()));
        rec.notify(Notice::Failure("bad".into()));
        assert_eq!(rec.failures(), vec!["bad".to_string()]);
    }
}
