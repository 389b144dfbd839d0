use maud::{html, Markup, Render};

pub struct Page {
    pub title: String,
    pub content: Box<dyn Render>,
}

impl Page {
    pub fn new(title: impl Into<String>, content: impl Render + 'static) -> Self {
        Self {
            title: title.into(),
            content: Box::new(content),
        }
    }
}

impl Render for Page {
    fn render(&self) -> Markup {
        html! {
            (maud::DOCTYPE)
            head {
                title { (self.title) }
                script src="https://unpkg.com/@tailwindcss/browser@4" {}
                meta name="viewport" content="width=device-width, initial-scale=1.0";
            }

            div class="min-h-screen bg-white md:bg-gradient-to-br md:from-blue-100 md:via-indigo-50 md:to-purple-100 py-4 md:py-8 px-0 sm:px-4 md:px-6 lg:px-8" {
                (self.content.render())
            }
        }
    }
}

impl axum::response::IntoResponse for Page {
    fn into_response(self) -> axum::response::Response {
        self.render().into_response()
    }
}

pub struct Card {
    pub content: Box<dyn Render>,
}

impl Card {
    pub fn new(content: impl Render + 'static) -> Self {
        Self {
            content: Box::new(content),
        }
    }
}

impl Render for Card {
    fn render(&self) -> Markup {
        html! {
            div class={"max-w-md mx-auto bg-white rounded-lg sm:rounded-xl md:rounded-2xl border border-gray-100 shadow-md sm:shadow-lg md:shadow-xl overflow-hidden w-full"} {
                div class="px-8 py-6" {
                    (self.content.render())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_wraps_content() {
        let html = Card::new(html! { p { "hello" } }).render().into_string();

        assert!(html.starts_with("<div class=\"max-w-md mx-auto"));
        assert!(html.contains("<p>hello</p>"));
    }

    #[test]
    fn test_page_has_title() {
        let html = Page::new("Home", Card::new(html! {})).render().into_string();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Home</title>"));
    }
}
