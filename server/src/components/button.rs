use maud::{html, Markup, Render};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ButtonVariant {
    Primary,
    Secondary,
}

/// A link styled as a button, or a submit button when no `href` is given
pub struct Button {
    pub text: String,
    pub href: Option<String>,
    pub variant: ButtonVariant,
    pub full_width: bool,
}

impl Button {
    pub fn primary(text: &str) -> Self {
        Self {
            text: text.to_string(),
            href: None,
            variant: ButtonVariant::Primary,
            full_width: false,
        }
    }

    pub fn secondary(text: &str) -> Self {
        Self {
            variant: ButtonVariant::Secondary,
            ..Self::primary(text)
        }
    }

    pub fn href(mut self, href: &str) -> Self {
        self.href = Some(href.to_string());
        self
    }

    pub fn full_width(mut self, full_width: bool) -> Self {
        self.full_width = full_width;
        self
    }

    fn classes(&self) -> String {
        let variant = match self.variant {
            ButtonVariant::Primary => "bg-indigo-600 hover:bg-indigo-700 text-white",
            ButtonVariant::Secondary => {
                "bg-white hover:bg-gray-50 text-indigo-600 border border-indigo-300"
            }
        };
        let width = if self.full_width { "w-full" } else { "" };

        format!("{variant} {width} py-2.5 px-4 font-medium rounded-lg shadow-sm flex items-center justify-center cursor-pointer")
    }
}

impl Render for Button {
    fn render(&self) -> Markup {
        let classes = self.classes();

        match &self.href {
            Some(href) => html! { a href=(href) class=(classes) { (self.text) } },
            None => html! { button type="submit" class=(classes) { (self.text) } },
        }
    }
}
