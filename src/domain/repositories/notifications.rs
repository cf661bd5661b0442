use crate::domain::value_objects::notifications::Toast;

#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, toast: Toast);
}
