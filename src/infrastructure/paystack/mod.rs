pub mod inline_widget;
