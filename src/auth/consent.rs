use crate::auth::AuthError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};
use tokio::sync::Mutex;
use url::Url;

/// Gets a human through the provider's consent page and hands back the URL the
/// provider redirected to.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn callback_url(&self, authorize_url: &Url, redirect_uri: &Url)
        -> Result<String, AuthError>;
}

/// Opens the browser and waits for the redirect URL to be pasted
pub struct TerminalConsent<R = BufReader<Stdin>> {
    /// How long to wait for the pasted URL
    timeout: Duration,
    open_browser: bool,
    input: Mutex<R>,
}

impl TerminalConsent {
    /// Reads the pasted URL from stdin
    pub fn new(timeout: Duration, open_browser: bool) -> Self {
        Self::with_input(timeout, open_browser, BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> TerminalConsent<R> {
    pub fn with_input(timeout: Duration, open_browser: bool, input: R) -> Self {
        Self {
            timeout,
            open_browser,
            input: Mutex::new(input),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> ConsentPrompt for TerminalConsent<R> {
    async fn callback_url(
        &self,
        authorize_url: &Url,
        redirect_uri: &Url,
    ) -> Result<String, AuthError> {
        println!("\n*** ACTION REQUIRED ***");
        println!("1) Open the authorisation page (your browser should open it for you):");
        println!("   {authorize_url}");
        println!("2) Authorise the app.");
        println!("3) When you are redirected to {redirect_uri} copy the ENTIRE URL.");
        println!("4) Paste it here and press <Enter>.\n");
        if self.open_browser {
            if let Err(e) = open::that(authorize_url.as_str()) {
                log::warn!("Unable to open browser: {}", e);
            }
        }
        println!("Paste redirect URL: ");

        let mut input = self.input.lock().await;
        let mut line = String::new();
        let read = tokio::time::timeout(self.timeout, input.read_line(&mut line))
            .await
            .map_err(|_| AuthError::ConsentTimedOut(self.timeout))?
            .map_err(AuthError::ConsentInput)?;
        // Zero bytes means the input was closed
        if read == 0 || line.trim().is_empty() {
            return Err(AuthError::ConsentAborted);
        }
        Ok(line.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls() -> (Url, Url) {
        (
            Url::parse("https://x.com/i/oauth2/authorize?state=abc").unwrap(),
            Url::parse("https://example.com/callback").unwrap(),
        )
    }

    #[tokio::test]
    async fn pasted_url_is_trimmed() {
        let (authorize, redirect) = urls();
        let consent = TerminalConsent::with_input(
            Duration::from_secs(5),
            false,
            &b"  https://example.com/callback?code=c&state=abc \n"[..],
        );
        assert_eq!(
            consent.callback_url(&authorize, &redirect).await.unwrap(),
            "https://example.com/callback?code=c&state=abc"
        );
    }

    #[tokio::test]
    async fn closed_input_aborts() {
        let (authorize, redirect) = urls();
        let consent = TerminalConsent::with_input(Duration::from_secs(5), false, &b""[..]);
        assert!(matches!(
            consent.callback_url(&authorize, &redirect).await,
            Err(AuthError::ConsentAborted)
        ));

        let blank = TerminalConsent::with_input(Duration::from_secs(5), false, &b"\n"[..]);
        assert!(matches!(
            blank.callback_url(&authorize, &redirect).await,
            Err(AuthError::ConsentAborted)
        ));
    }

    #[tokio::test]
    async fn silent_input_times_out() {
        let (authorize, redirect) = urls();
        // The writer stays open, so the read never completes
        let (_writer, reader) = tokio::io::duplex(64);
        let timeout = Duration::from_millis(50);
        let consent = TerminalConsent::with_input(timeout, false, BufReader::new(reader));
        match consent.callback_url(&authorize, &redirect).await {
            Err(AuthError::ConsentTimedOut(waited)) => assert_eq!(waited, timeout),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
