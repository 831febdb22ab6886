//! Bare bones HTML for the login pages. Every value that came from a request goes through
//! [`escape`].

use std::fmt::Write;

use crate::gate::Notice;

use super::http::AUTH_PATH;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

fn page(title: &str, notice: Option<&Notice>, body: &str) -> String {
    let mut html = format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"UTF-8\"><title>{title}</title></head>\n<body>\n<h1>{title}</h1>\n"
    );
    match notice {
        Some(Notice::Error(msg)) => {
            let _ = writeln!(html, "<p class=\"error\">{}</p>", escape(msg));
        }
        Some(Notice::Success(msg)) => {
            let _ = writeln!(html, "<p class=\"success\">{}</p>", escape(msg));
        }
        None => {}
    }
    html.push_str(body);
    html.push_str("</body>\n</html>\n");
    html
}

/// The login form, or the recovery form when `recover` is set. The recovery link is only offered
/// when recovery is possible at all.
pub fn login(
    user_id: Option<&str>,
    recover: bool,
    recovery_enabled: bool,
    notice: Option<&Notice>,
) -> String {
    let raw_user_id = user_id.unwrap_or_default();
    let user_id = escape(raw_user_id);
    if recover && recovery_enabled {
        let body = format!(
            "<form method=\"post\" action=\"{AUTH_PATH}\">\n\
             <input type=\"hidden\" name=\"recover\" value=\"1\">\n\
             <label>Username <input type=\"text\" name=\"user_id\" value=\"{user_id}\"></label>\n\
             <label>E-mail <input type=\"email\" name=\"user_email\"></label>\n\
             <button type=\"submit\">Recover your password</button>\n\
             </form>\n\
             <p><a href=\"{AUTH_PATH}\">Back to login</a></p>\n"
        );
        return page("Password recovery", notice, &body);
    }

    let mut body = format!(
        "<form method=\"post\" action=\"{AUTH_PATH}\">\n\
         <label>Username <input type=\"text\" name=\"user_id\" value=\"{user_id}\"></label>\n\
         <label>Password <input type=\"password\" name=\"user_pwd\"></label>\n\
         <label><input type=\"checkbox\" name=\"user_remember\" value=\"1\"> Remember my ID on this computer</label>\n\
         <label><input type=\"checkbox\" name=\"safe_mode\" value=\"1\"> Safe mode login</label>\n\
         <button type=\"submit\">Log in</button>\n\
         </form>\n"
    );
    if recovery_enabled {
        let query: String = form_urlencoded::Serializer::new(String::new())
            .append_pair("recover", "1")
            .append_pair("user", raw_user_id)
            .finish();
        let _ = writeln!(
            body,
            "<p><a href=\"{AUTH_PATH}?{}\">I forgot my password</a></p>",
            escape(&query)
        );
    }
    page("Administration", notice, &body)
}

/// The forced password change form, carrying the pending change bundle along
pub fn change_password(login_data: &str, notice: Option<&Notice>) -> String {
    let body = format!(
        "<p>You must change your password before you can continue.</p>\n\
         <form method=\"post\" action=\"{AUTH_PATH}\">\n\
         <input type=\"hidden\" name=\"login_data\" value=\"{}\">\n\
         <label>New password <input type=\"password\" name=\"new_pwd\"></label>\n\
         <label>Confirm password <input type=\"password\" name=\"new_pwd_c\"></label>\n\
         <button type=\"submit\">Change my password</button>\n\
         </form>\n",
        escape(login_data)
    );
    page("Change your password", notice, &body)
}
