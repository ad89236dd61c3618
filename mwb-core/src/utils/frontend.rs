//! Embedded control page served at `/`.
//!
//! Buttons fire `/move` requests, the image element renders the MJPEG pull
//! stream. The page is an opaque collaborator as far as the core is
//! concerned; the gateway only hands it out verbatim.

pub(crate) const HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Mecanum Robot Control</title>
    <style>
        body { font-family: Arial, sans-serif; text-align: center; }
        .button { padding: 20px; font-size: 16px; margin: 10px; }
        #videoStream { border: 2px solid #000; }
    </style>
</head>
<body>
    <h1>Mecanum Robot Control</h1>
    <div>
        <button class="button" onclick="sendCommand('forward')">Forward</button>
    </div>
    <div>
        <button class="button" onclick="sendCommand('backward')">Backward</button>
    </div>
    <div>
        <button class="button" onclick="sendCommand('left')">Left</button>
        <button class="button" onclick="sendCommand('right')">Right</button>
    </div>
    <div>
        <button class="button" onclick="sendCommand('stop')">Stop</button>
    </div>
    <h2>Live Video Stream</h2>
    <img id="videoStream" src="/stream" width="640" height="480" />
    <script>
        function sendCommand(direction) {
            fetch(`/move?direction=${direction}`)
                .then(response => response.text())
                .then(text => console.log(text));
        }
    </script>
</body>
</html>
"#;
