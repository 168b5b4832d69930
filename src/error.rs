use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: None,
        }
    }

    pub fn missing_query() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Ingresa un termino de busqueda.".to_string(),
            code: Some("NO_QUERY"),
        }
    }

    pub fn missing_url() -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: "Ingresa una URL valida.".to_string(),
            code: Some("NO_URL"),
        }
    }

    pub fn file_not_ready() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "El archivo aun no esta listo.".to_string(),
            code: Some("FILE_NOT_READY"),
        }
    }

    pub fn file_missing() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "El archivo ya no existe en el servidor.".to_string(),
            code: Some("FILE_MISSING"),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: Some("UPSTREAM_ERROR"),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}
