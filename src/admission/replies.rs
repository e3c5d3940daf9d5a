//! Canned replies and keyword matching for the Electra persona.

use crate::channels::traits::MediaKind;

pub const WELCOME: &str = "¡Hola! 👋 Soy Electra, el asistente virtual de ElectronicsJS. Estoy aquí para ayudarte con información sobre nuestros productos y servicios.

Si en cualquier momento deseas hablar con un representante humano, puedes escribir \"agente\" o \"hablar con persona real\".

¿En qué puedo ayudarte hoy?";

pub const HUMAN_REQUEST: &str = "Entiendo que prefieres hablar con un representante humano. Voy a conectarte con uno de nuestros agentes.

⏳ Por favor, ten en cuenta que puede haber un tiempo de espera. Mientras tanto, ¿hay algo específico en lo que pueda ayudarte?

Para volver al asistente virtual en cualquier momento, escribe \"volver al bot\".";

pub const ERROR: &str = "Lo siento, estamos experimentando dificultades técnicas. Por favor, intenta nuevamente en unos momentos.

Si el problema persiste, puedes escribir \"agente\" para hablar con una persona real.";

pub const TIMEOUT: &str = "Lo siento, tu mensaje está tomando más tiempo del esperado. Por favor, intenta nuevamente o escribe \"agente\" para hablar con una persona real.";

pub const MEDIA_RECEIVED: &str = "¡Gracias por compartir este contenido! 📁

Para brindarte una mejor atención, te conectaré con uno de nuestros representantes que podrá revisar tu archivo y ayudarte personalmente.

⏳ Un agente se pondrá en contacto contigo pronto. Mientras tanto, ¿hay algo específico que quieras mencionar sobre el archivo compartido?";

pub const SPAM_WARNING: &str = "⚠️ Has enviado demasiados mensajes repetidos. Por favor, espera 2 minutos antes de enviar más mensajes.";

pub const RATE_LIMIT: &str = "⚠️ Has enviado demasiados mensajes en poco tiempo.

Por favor, espera un momento antes de enviar más mensajes. Esto nos ayuda a mantener una conversación más efectiva.

Si tienes una urgencia, escribe \"agente\" para hablar con una persona real.";

pub const REPEATED_MESSAGE: &str = "Parece que estás enviando el mismo mensaje repetidamente.

¿Hay algo específico en lo que pueda ayudarte? Si necesitas hablar con un agente humano, solo escribe \"agente\".";

pub const HORARIO: &str = "Horario de atención:
Atención disponible 24 horas al día, 7 días a la semana.
¡Estamos siempre listos para ayudarte!";

pub const WEB_PAGE: &str = "Para más información, visita nuestra página web: https://irvin-benitez.software. Estamos aquí para ayudarte con cualquier consulta que tengas sobre nuestros productos y servicios. ¡Gracias por elegir ElectronicsJS!";

pub const BOT_AVAILABLE_AGAIN: &str =
    "El asistente virtual está nuevamente disponible. ¿En qué puedo ayudarte?";

pub const WELCOME_BACK: &str = "¡Bienvenido de vuelta! ¿En qué puedo ayudarte?";

pub const PURCHASE_FOOTER: &str = "¿Te gustaría comprar esta laptop? Aquí tienes las opciones disponibles:
- 🗣️ Hablar con un agente real: Escribe \"agente\" para conectarte con un representante.
- 🌐 Comprar en línea: Visita nuestra página web: https://irvin-benitez.software
- 🏬 Visitar la tienda: Estamos ubicados en La chorrera. ¡Te esperamos!";

pub const HUMAN_KEYWORDS: &[&str] = &[
    "agente",
    "persona real",
    "humano",
    "representante",
    "asesor",
    "hablar con alguien",
];

pub const RETURN_KEYWORDS: &[&str] = &["volver al bot", "bot", "asistente virtual", "chatbot"];

pub const PURCHASE_KEYWORDS: &[&str] = &[
    "comprar",
    "cotizar",
    "llevar",
    "adquirir",
    "quiero comprar",
    "precio",
    "costo",
];

const WEB_KEYWORDS: &[&str] = &["web", "página web", "pagina web"];

/// Lowercase and trim, the form every keyword check runs against.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

fn contains_any(normalized: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| normalized.contains(k))
}

pub fn requests_human(normalized: &str) -> bool {
    contains_any(normalized, HUMAN_KEYWORDS)
}

pub fn requests_bot(normalized: &str) -> bool {
    contains_any(normalized, RETURN_KEYWORDS)
}

pub fn has_purchase_intent(normalized: &str) -> bool {
    contains_any(normalized, PURCHASE_KEYWORDS)
}

/// Canned reply for a direct query, bypassing the generator.
///
/// Greeting and hours match exactly; the website query matches anywhere in
/// the text.
pub fn shortcut(normalized: &str) -> Option<&'static str> {
    match normalized {
        "hola" => Some(WELCOME),
        "horario" => Some(HORARIO),
        text if contains_any(text, WEB_KEYWORDS) => Some(WEB_PAGE),
        _ => None,
    }
}

/// Media acknowledgement, with a line naming the media type where one exists.
pub fn media_received(kind: MediaKind) -> String {
    let detail = match kind {
        MediaKind::Image => Some("📸 He notado que has compartido una imagen."),
        MediaKind::Audio => Some("🎵 He notado que has compartido un mensaje de voz."),
        MediaKind::Video => Some("🎥 He notado que has compartido un video."),
        MediaKind::Document => Some("📄 He notado que has compartido un documento."),
        MediaKind::Sticker | MediaKind::Other => None,
    };
    match detail {
        Some(line) => format!("{MEDIA_RECEIVED}\n\n{line}"),
        None => MEDIA_RECEIVED.to_owned(),
    }
}

/// Append the purchase-options footer.
pub fn with_purchase_footer(reply: &str) -> String {
    format!("{reply}\n\n{PURCHASE_FOOTER}")
}
