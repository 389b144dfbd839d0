use axum::response::{IntoResponse, Response};
use maud::html;

use crate::{
    components::{
        button::Button,
        layout::{Card, Page},
    },
    errors::{FlowError, UserFacing},
};

/// Log a failed callback and render what the user gets to see: either
/// "access denied" or a generic retry prompt. Details stay in the logs.
pub fn failure_page(err: &FlowError) -> Response {
    err.log();

    let (title, message) = match err.user_facing() {
        UserFacing::AccessDenied => (
            "Access denied",
            "You declined to grant access, so you were not signed in.",
        ),
        UserFacing::RetryLogin => (
            "Something went wrong",
            "We could not sign you in. Please retry login.",
        ),
    };

    let content = html! {
        h1 class="text-3xl font-bold mb-2 text-gray-800" { (title) }
        p class="text-gray-600 mb-6" { (message) }

        div class="space-y-3" {
            (Button::primary("Retry login").href("/oauth/login").full_width(true))
            (Button::secondary("Return to Home").href("/").full_width(true))
        }
    };

    (err.status(), Page::new(title, Card::new(content))).into_response()
}
