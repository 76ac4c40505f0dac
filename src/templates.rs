//! Fixed registry of WhatsApp notification templates and the renderer that
//! fills their `{placeholder}` tokens.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::NotifyError;

/// A value substituted into a template. JSON strings and numbers are both
/// accepted; `null` renders as an empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateValue {
    Text(String),
    Number(serde_json::Number),
    Empty,
}

impl fmt::Display for TemplateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateValue::Text(s) => f.write_str(s),
            TemplateValue::Number(n) => write!(f, "{}", n),
            TemplateValue::Empty => Ok(()),
        }
    }
}

impl From<&str> for TemplateValue {
    fn from(s: &str) -> Self {
        TemplateValue::Text(s.to_string())
    }
}

impl From<String> for TemplateValue {
    fn from(s: String) -> Self {
        TemplateValue::Text(s)
    }
}

impl From<i64> for TemplateValue {
    fn from(n: i64) -> Self {
        TemplateValue::Number(n.into())
    }
}

impl From<u64> for TemplateValue {
    fn from(n: u64) -> Self {
        TemplateValue::Number(n.into())
    }
}

/// Placeholder name to value.
pub type Variables = HashMap<String, TemplateValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    Welcome,
    ClassReminder,
    Attendance,
    ClassCreated,
    PaymentReminder,
}

impl Template {
    pub const ALL: [Template; 5] = [
        Template::Welcome,
        Template::ClassReminder,
        Template::Attendance,
        Template::ClassCreated,
        Template::PaymentReminder,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Template::Welcome => "welcome",
            Template::ClassReminder => "class_reminder",
            Template::Attendance => "attendance",
            Template::ClassCreated => "class_created",
            Template::PaymentReminder => "payment_reminder",
        }
    }

    pub fn body(self) -> &'static str {
        match self {
            Template::Welcome => WELCOME,
            Template::ClassReminder => CLASS_REMINDER,
            Template::Attendance => ATTENDANCE,
            Template::ClassCreated => CLASS_CREATED,
            Template::PaymentReminder => PAYMENT_REMINDER,
        }
    }

    /// Distinct placeholder keys referenced by the body, in order of first
    /// appearance.
    pub fn placeholders(self) -> Vec<&'static str> {
        let mut keys: Vec<&'static str> = Vec::new();
        for token in scan(self.body()) {
            if let Token::Placeholder(key) = token {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Substitute every `{key}` with its value. Keys missing from `vars`
    /// become empty strings.
    pub fn render(self, vars: &Variables) -> String {
        let body = self.body();
        let mut out = String::with_capacity(body.len() + 64);
        for token in scan(body) {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::Placeholder(key) => {
                    if let Some(value) = vars.get(key) {
                        out.push_str(&value.to_string());
                    }
                }
            }
        }
        out
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Template {
    type Err = NotifyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Template::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| NotifyError::UnknownTemplate(s.to_string()))
    }
}

/// Resolve `name` and render it in one step.
pub fn render(name: &str, vars: &Variables) -> Result<String, NotifyError> {
    Ok(name.parse::<Template>()?.render(vars))
}

enum Token<'a> {
    Literal(&'a str),
    Placeholder(&'a str),
}

fn is_placeholder_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split a body into literal runs and `{key}` placeholders. Braces that do
/// not wrap a valid key stay literal.
fn scan(body: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_placeholder_key(&after[..close]) => {
                if open > 0 {
                    tokens.push(Token::Literal(&rest[..open]));
                }
                tokens.push(Token::Placeholder(&after[..close]));
                rest = &after[close + 1..];
            }
            _ => {
                // keep the brace and move past it
                tokens.push(Token::Literal(&rest[..=open]));
                rest = after;
            }
        }
    }
    if !rest.is_empty() {
        tokens.push(Token::Literal(rest));
    }
    tokens
}

const WELCOME: &str = "🎓 *Bienvenido a RoboWorks Academy* 🎓

Hola *{nombre}*,

Tus credenciales de acceso a la plataforma son:

🔑 *Usuario:* `{usuario}`
🔐 *Contraseña temporal:* `{password}`
🎫 *Código de invitación:* `{codigo}`

📌 *Primeros pasos:*
1. Ingresa a: https://roboworks.site/plataforma/login.html
2. Usa tu usuario y contraseña temporal
3. El sistema te pedirá cambiar tu contraseña
4. Guarda tu código de invitación

¡Prepárate para tu primera clase de robótica! 🤖

*RoboWorks Academy* - Donde la tecnología cobra vida";

const CLASS_REMINDER: &str = "🤖 *Recordatorio de Clase* 🤖

Hola *{nombre}*,

Tu próxima clase está por comenzar:

📅 *Fecha:* {fecha}
⏰ *Hora:* {hora}
📚 *Clase:* {clase}
👨‍🏫 *Profesor:* {profesor}
🔗 *Enlace Zoom:*
{zoom_link}

⚠️ *Recomendaciones:*
- Ingresa 5 minutos antes
- Ten tu material listo
- Micrófono y cámara preparados

¡Te esperamos! 🚀

*RoboWorks Academy*";

const ATTENDANCE: &str = "✅ *Asistencia Registrada* ✅

Hola *{nombre}*,

Hemos registrado tu asistencia a la clase:

📚 *{clase}*
📅 *{fecha}*
⏰ *Hora:* {hora}

¡Excelente trabajo! Sigue así 🌟

*RoboWorks Academy*";

const CLASS_CREATED: &str = "🎉 *Nueva Clase Asignada* 🎉

Hola *{nombre}*,

Te hemos asignado una nueva clase:

📚 *{clase}*
📅 *Día:* {dia}
⏰ *Hora:* {hora}
🔗 *Zoom:* {zoom_link}

*Detalles de la clase:*
{descripcion}

Revisa la plataforma para más información:
https://roboworks.site/plataforma/dashboard.html

¡Nos vemos en clase! 🤖

*RoboWorks Academy*";

const PAYMENT_REMINDER: &str = "💰 *Recordatorio de Pago* 💰

Hola *{nombre}*,

Te recordamos que el pago de la mensualidad está próximo:

📚 *Clase:* {clase}
📅 *Fecha límite:* {fecha_limite}
💵 *Monto:* {monto}

Puedes realizar el pago por:
🟣 Pago Móvil
💳 Transferencia
💵 Efectivo en clase

Mantén al día tu inscripción para seguir disfrutando de la robótica 🚀

*RoboWorks Academy*";
